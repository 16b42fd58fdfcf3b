// Mirrors migrations/. Regenerate with `diesel print-schema` after changing them.

diesel::table! {
    users (id) {
        id -> Uuid,
        name -> Text,
        email -> Text,
        role -> Text,
    }
}

diesel::table! {
    availability_records (professor_id) {
        professor_id -> Uuid,
    }
}

diesel::table! {
    available_slots (professor_id, slot) {
        professor_id -> Uuid,
        slot -> Timestamptz,
    }
}

diesel::table! {
    appointments (id) {
        id -> Uuid,
        student_id -> Uuid,
        professor_id -> Uuid,
        slot -> Timestamptz,
    }
}

diesel::joinable!(available_slots -> availability_records (professor_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    availability_records,
    available_slots,
    appointments,
);
