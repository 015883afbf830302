// Kept in sync with the DDL in schema.rs.

diesel::table! {
    identity_mappings (entity_kind, remote_key) {
        entity_kind -> Text,
        remote_key -> Text,
        local_key -> Text,
        owner_key -> Nullable<Text>,
        parent_remote_key -> Nullable<Text>,
        batch_label -> Nullable<Text>,
        provenance -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    relation_mappings (remote_key) {
        remote_key -> Text,
        first_owner_key -> Text,
        second_owner_key -> Text,
        variant_sequence -> Integer,
        batch_label -> Nullable<Text>,
        provenance -> Text,
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(identity_mappings, relation_mappings);
