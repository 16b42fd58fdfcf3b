use crate::{
    backend::SchedulingBackend,
    error::StoreError,
    ledger::{Appointment, Ledger, NewAppointment, Reservation},
    slot_set::SlotSet,
    types::{AppointmentId, NewUser, SlotTime, User, UserId},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::debug;
use uuid::Uuid;

/// Non-persistent backend. Every professor's slot set and ledger live in
/// one partition behind their own mutex.
#[derive(Debug, Clone, Default)]
pub struct LocalScheduling {
    users: Arc<Mutex<HashMap<UserId, User>>>,
    partitions: Arc<Mutex<HashMap<UserId, Arc<Mutex<Partition>>>>>,
    appointment_owners: Arc<Mutex<HashMap<AppointmentId, UserId>>>,
}

#[derive(Debug, Default)]
struct Partition {
    // None until the professor publishes for the first time
    slots: Option<SlotSet>,
    ledger: Ledger,
}

// Every critical section leaves the maps consistent, so a poisoned lock is
// still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalScheduling {
    fn partition(&self, professor_id: UserId) -> Arc<Mutex<Partition>> {
        lock(&self.partitions)
            .entry(professor_id)
            .or_default()
            .clone()
    }

    fn existing_partition(&self, professor_id: UserId) -> Option<Arc<Mutex<Partition>>> {
        lock(&self.partitions).get(&professor_id).cloned()
    }

    fn owner_of(&self, id: AppointmentId) -> Option<UserId> {
        lock(&self.appointment_owners).get(&id).copied()
    }
}

#[async_trait]
impl SchedulingBackend for LocalScheduling {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users).get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = lock(&self.users);
        if users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Duplicate(format!(
                "Email {} is already registered",
                user.email
            )));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            role: user.role,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn add_slots(
        &self,
        professor_id: UserId,
        slots: &[SlotTime],
    ) -> Result<usize, StoreError> {
        let partition = self.partition(professor_id);
        let mut partition = lock(&partition);
        let added = partition
            .slots
            .get_or_insert_with(SlotSet::default)
            .add_slots(slots.iter().copied());
        debug!(%professor_id, added, "Slots added");
        Ok(added)
    }

    async fn remove_slot(&self, professor_id: UserId, slot: SlotTime) -> Result<bool, StoreError> {
        let Some(partition) = self.existing_partition(professor_id) else {
            return Ok(false);
        };
        let mut partition = lock(&partition);
        Ok(partition
            .slots
            .as_mut()
            .is_some_and(|slots| slots.remove_slot(slot)))
    }

    async fn contains_slot(
        &self,
        professor_id: UserId,
        slot: SlotTime,
    ) -> Result<bool, StoreError> {
        let Some(partition) = self.existing_partition(professor_id) else {
            return Ok(false);
        };
        let partition = lock(&partition);
        Ok(partition
            .slots
            .as_ref()
            .is_some_and(|slots| slots.contains(slot)))
    }

    async fn available_slots(
        &self,
        professor_id: UserId,
    ) -> Result<Option<Vec<SlotTime>>, StoreError> {
        let Some(partition) = self.existing_partition(professor_id) else {
            return Ok(None);
        };
        let partition = lock(&partition);
        Ok(partition.slots.as_ref().map(SlotSet::to_vec))
    }

    async fn create_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let appointment = appointment.into_appointment();
        let partition = self.partition(appointment.professor_id);
        let mut partition = lock(&partition);
        partition.ledger.create(appointment.clone());
        lock(&self.appointment_owners).insert(appointment.id, appointment.professor_id);
        Ok(appointment)
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let Some(partition) = self.owner_of(id).and_then(|owner| self.existing_partition(owner))
        else {
            return Ok(None);
        };
        let partition = lock(&partition);
        Ok(partition.ledger.get(id).cloned())
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<bool, StoreError> {
        let Some(partition) = self.owner_of(id).and_then(|owner| self.existing_partition(owner))
        else {
            return Ok(false);
        };
        let mut partition = lock(&partition);
        let deleted = partition.ledger.delete(id).is_some();
        lock(&self.appointment_owners).remove(&id);
        Ok(deleted)
    }

    async fn appointments_for_professor(
        &self,
        professor_id: UserId,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(partition) = self.existing_partition(professor_id) else {
            return Ok(vec![]);
        };
        let partition = lock(&partition);
        Ok(partition.ledger.appointments())
    }

    async fn reserve_slot(&self, appointment: NewAppointment) -> Result<Reservation, StoreError> {
        let Some(partition) = self.existing_partition(appointment.professor_id) else {
            return Ok(Reservation::SlotTaken);
        };
        let mut partition = lock(&partition);

        // A slot republished while booked stays with its booking.
        if partition.ledger.holds_slot(appointment.slot) {
            return Ok(Reservation::SlotTaken);
        }
        let claimed = partition
            .slots
            .as_mut()
            .is_some_and(|slots| slots.remove_slot(appointment.slot));
        if !claimed {
            return Ok(Reservation::SlotTaken);
        }

        let appointment = appointment.into_appointment();
        partition.ledger.create(appointment.clone());
        lock(&self.appointment_owners).insert(appointment.id, appointment.professor_id);
        Ok(Reservation::Reserved(appointment))
    }

    async fn release_slot(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let Some(partition) = self.owner_of(id).and_then(|owner| self.existing_partition(owner))
        else {
            return Ok(None);
        };
        let mut partition = lock(&partition);

        let Some(appointment) = partition.ledger.delete(id) else {
            return Ok(None);
        };
        lock(&self.appointment_owners).remove(&id);
        partition
            .slots
            .get_or_insert_with(SlotSet::default)
            .add_slots([appointment.slot]);
        Ok(Some(appointment))
    }
}

impl LocalScheduling {
    /// Snapshot of (available, booked) for one professor.
    #[cfg(test)]
    pub fn partition_snapshot(
        &self,
        professor_id: UserId,
    ) -> (std::collections::HashSet<SlotTime>, Vec<SlotTime>) {
        let partition = self.partition(professor_id);
        let partition = lock(&partition);
        let available = partition
            .slots
            .as_ref()
            .map(|slots| slots.to_vec().into_iter().collect())
            .unwrap_or_default();
        let booked = partition
            .ledger
            .appointments()
            .into_iter()
            .map(|appointment| appointment.slot)
            .collect();
        (available, booked)
    }
}
