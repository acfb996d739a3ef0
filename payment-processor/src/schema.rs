diesel::table! {
    payments (id) {
        id -> Uuid,
        amount -> Int8,
        currency -> Varchar,
        status -> Varchar,
        payment_method -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    payment_actions (id) {
        id -> Uuid,
        payment_id -> Uuid,
        amount -> Int8,
        action_type -> Varchar,
        response_code -> Nullable<Varchar>,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(payment_actions -> payments (payment_id));

diesel::allow_tables_to_appear_in_same_query!(
    payments,
    payment_actions,
    outbox_events,
);
