// Patchdesk schema - ticket and proposal tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    tickets (id) {
        id -> Integer,
        title -> Text,
        description -> Nullable<Text>,
        category -> Text,
        priority -> Text,
        status -> Text,
        creator -> Nullable<Text>,
        assignee -> Nullable<Text>,
        ai_suggestion -> Nullable<Text>,
        ai_status -> Nullable<Text>,         // pending | accepted | rejected
        ai_files_analyzed -> Nullable<Text>, // JSON array of paths
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    proposed_changes (id) {
        id -> Integer,
        ticket_id -> Nullable<Integer>,
        file_path -> Text,
        original_content -> Text,
        original_checksum -> Text,       // sha256 hex of original_content
        proposed_content -> Text,
        change_description -> Text,
        status -> Text,                  // pending | accepted | rejected
        created_at -> Text,
        updated_at -> Text,
        resolved_at -> Nullable<Text>,
    }
}

diesel::table! {
    conversation_turns (id) {
        id -> Integer,
        scope -> Text,                   // "general" or "ticket:<id>"
        role -> Text,                    // user | assistant
        content -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    change_history (id) {
        id -> Integer,
        ticket_id -> Nullable<Integer>,
        files_affected -> Text,          // JSON array of paths
        change_type -> Text,             // analyze | modify
        summary -> Text,
        ai_response -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    findings (id) {
        id -> Integer,
        ticket_id -> Nullable<Integer>,
        kind -> Text,                    // summary | finding | recommendation | note
        title -> Nullable<Text>,
        content -> Text,
        tags -> Text,                    // JSON array of tags
        created_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tickets, proposed_changes);
