diesel::table! {
    orders (id) {
        id -> Int8,
        order_sn -> Varchar,
        user_id -> Int8,
        status -> Varchar,
        order_amount -> Numeric,
        address -> Varchar,
        recipient_name -> Varchar,
        recipient_phone -> Varchar,
        post -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Int8,
        order_id -> Int8,
        product_id -> Int8,
        product_name -> Varchar,
        product_image -> Varchar,
        unit_price -> Numeric,
        quantity -> Int4,
    }
}

diesel::table! {
    cart_lines (id) {
        id -> Int8,
        user_id -> Int8,
        product_id -> Int8,
        quantity -> Int4,
        checked -> Bool,
    }
}

diesel::table! {
    outbox_messages (id) {
        id -> Uuid,
        order_sn -> Varchar,
        topic -> Varchar,
        payload -> Jsonb,
        state -> Varchar,
        deliver_after -> Timestamptz,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    cart_lines,
    outbox_messages,
);
