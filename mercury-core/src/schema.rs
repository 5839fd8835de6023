use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    message (id) {
        id -> BigInt,
        conv_id -> Text,
        seq -> BigInt,
        msg_id -> Text,
        client_msg_id -> Text,
        from_uuid -> Text,
        device_id -> Text,
        msg_type -> SmallInt,
        content -> Jsonb,
        status -> SmallInt,
        send_time -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    conversation (id) {
        id -> BigInt,
        conv_id -> Text,
        conv_type -> SmallInt,
        owner_uuid -> Text,
        target_uuid -> Text,
        last_msg_id -> Nullable<Text>,
        last_msg_preview -> Nullable<Text>,
        last_msg_at -> Nullable<Timestamptz>,
        max_seq -> BigInt,
        read_seq -> BigInt,
        clear_seq -> BigInt,
        unread_count -> BigInt,
        mute -> Bool,
        pin -> Bool,
        status -> SmallInt,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    group_conversation (group_uuid) {
        group_uuid -> Text,
        max_seq -> BigInt,
        last_msg_id -> Nullable<Text>,
        last_msg_preview -> Nullable<Text>,
        last_msg_at -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(message, conversation, group_conversation);
