use crate::{
    engine::{EngineSettings, ReservationEngine},
    ledger::Appointment,
    local_scheduling::LocalScheduling,
    types::{NewUser, Role, SlotTime},
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Step {
    Add(Vec<u32>),
    Book(u32),
    Cancel(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop::collection::vec(0..12u32, 0..5).prop_map(Step::Add),
        (0..12u32).prop_map(Step::Book),
        (0..8usize).prop_map(Step::Cancel),
    ]
}

fn slot(hour: u32) -> SlotTime {
    Utc.with_ymd_and_hms(2025, 3, 10, 8 + hour, 0, 0).unwrap().into()
}

fn user(role: Role) -> NewUser {
    NewUser {
        name: role.to_string(),
        email: format!("{role}@example.edu"),
        role,
    }
}

proptest! {
    // Slots move between the available set and the ledger, never get lost
    // and never sit on both sides.
    #[test]
    fn test_slots_are_conserved(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = LocalScheduling::default();
            let engine = ReservationEngine::new(store.clone(), EngineSettings::default());
            let professor = engine.register_user(user(Role::Professor)).await.unwrap();
            let student = engine.register_user(user(Role::Student)).await.unwrap();

            let mut published = HashSet::new();
            let mut appointments: Vec<Appointment> = Vec::new();
            for step in steps {
                match step {
                    Step::Add(hours) => {
                        let slots: Vec<SlotTime> = hours.into_iter().map(slot).collect();
                        engine.add_availability(professor.id, &slots).await.unwrap();
                        published.extend(slots);
                    }
                    Step::Book(hour) => {
                        let free = published.contains(&slot(hour))
                            && appointments.iter().all(|a| a.slot != slot(hour));
                        let booked = engine.book(student.id, professor.id, slot(hour)).await;
                        prop_assert_eq!(booked.is_ok(), free);
                        if let Ok(appointment) = booked {
                            appointments.push(appointment);
                        }
                    }
                    Step::Cancel(index) if index < appointments.len() => {
                        let appointment = appointments.swap_remove(index);
                        let cancelled = engine.cancel(professor.id, appointment.id).await.unwrap();
                        prop_assert_eq!(cancelled, appointment);
                    }
                    Step::Cancel(_) => {}
                }

                let (available, booked) = store.partition_snapshot(professor.id);
                let booked_set: HashSet<SlotTime> = booked.iter().copied().collect();
                prop_assert_eq!(booked.len(), booked_set.len());
                prop_assert!(available.is_disjoint(&booked_set));
                let everything: HashSet<SlotTime> = available.union(&booked_set).copied().collect();
                prop_assert_eq!(&everything, &published);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
