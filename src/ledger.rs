use crate::types::{AppointmentId, SlotTime, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub student_id: UserId,
    pub professor_id: UserId,
    pub slot: SlotTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAppointment {
    pub student_id: UserId,
    pub professor_id: UserId,
    pub slot: SlotTime,
}

impl NewAppointment {
    pub fn into_appointment(self) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            student_id: self.student_id,
            professor_id: self.professor_id,
            slot: self.slot,
        }
    }
}

/// Outcome of claiming a slot and recording the appointment as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Reserved(Appointment),
    SlotTaken,
}

/// Active appointments of a single professor.
///
/// Plain record keeping: deciding whether an appointment may be created is
/// up to the caller.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    appointments: HashMap<AppointmentId, Appointment>,
}

impl Ledger {
    pub fn create(&mut self, appointment: Appointment) {
        self.appointments.insert(appointment.id, appointment);
    }

    pub fn get(&self, id: AppointmentId) -> Option<&Appointment> {
        self.appointments.get(&id)
    }

    pub fn delete(&mut self, id: AppointmentId) -> Option<Appointment> {
        self.appointments.remove(&id)
    }

    pub fn holds_slot(&self, slot: SlotTime) -> bool {
        self.appointments
            .values()
            .any(|appointment| appointment.slot == slot)
    }

    /// All appointments, ordered by slot.
    pub fn appointments(&self) -> Vec<Appointment> {
        let mut appointments: Vec<Appointment> = self.appointments.values().cloned().collect();
        appointments.sort_unstable_by(|a, b| a.slot.cmp(&b.slot).then(a.id.cmp(&b.id)));
        appointments
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn appointment_at(professor_id: UserId, hour: u32) -> Appointment {
        NewAppointment {
            student_id: Uuid::new_v4(),
            professor_id,
            slot: Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap().into(),
        }
        .into_appointment()
    }

    #[test]
    fn test_create_get_delete() {
        let professor_id = Uuid::new_v4();
        let mut ledger = Ledger::default();
        let appointment = appointment_at(professor_id, 10);

        ledger.create(appointment.clone());
        assert_eq!(ledger.get(appointment.id), Some(&appointment));
        assert!(ledger.holds_slot(appointment.slot));

        assert_eq!(ledger.delete(appointment.id), Some(appointment.clone()));
        assert!(ledger.get(appointment.id).is_none());
        assert!(!ledger.holds_slot(appointment.slot));
        assert!(ledger.delete(appointment.id).is_none());
    }

    #[test]
    fn test_appointments_sorted_by_slot() {
        let professor_id = Uuid::new_v4();
        let mut ledger = Ledger::default();
        let late = appointment_at(professor_id, 15);
        let early = appointment_at(professor_id, 8);
        ledger.create(late.clone());
        ledger.create(early.clone());

        assert_eq!(ledger.appointments(), vec![early, late]);
    }
}
