diesel::table! {
    stock_records (id) {
        id -> Int8,
        product_id -> Int8,
        warehouse_id -> Int8,
        on_hand -> Int4,
        locked -> Int4,
        version -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservation_journal (id) {
        id -> Int8,
        order_sn -> Varchar,
        status -> Varchar,
        lines -> Jsonb,
        locked_at -> Timestamptz,
        settled_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    stock_records,
    reservation_journal,
);
