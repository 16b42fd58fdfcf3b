use crate::{
    error::StoreError,
    ledger::{Appointment, NewAppointment, Reservation},
    types::{AppointmentId, NewUser, SlotTime, User, UserId},
};
use async_trait::async_trait;

/// Persistence operations the reservation engine is built on.
///
/// Single-store operations carry no business rules. `reserve_slot` and
/// `release_slot` touch the slot set and the ledger together and must be
/// applied by the backend as one atomic unit.
#[async_trait]
pub trait SchedulingBackend: Clone + Send + Sync + 'static {
    // Users
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    // Slot set
    /// Creates the availability record if missing. Returns the number of
    /// slots that were not present before.
    async fn add_slots(&self, professor_id: UserId, slots: &[SlotTime])
        -> Result<usize, StoreError>;
    /// Returns whether a slot was removed.
    async fn remove_slot(&self, professor_id: UserId, slot: SlotTime) -> Result<bool, StoreError>;
    async fn contains_slot(&self, professor_id: UserId, slot: SlotTime)
        -> Result<bool, StoreError>;
    /// `None` if the professor never published availability.
    async fn available_slots(&self, professor_id: UserId)
        -> Result<Option<Vec<SlotTime>>, StoreError>;

    // Appointment ledger
    async fn create_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, StoreError>;
    async fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;
    /// Returns whether an appointment was deleted.
    async fn delete_appointment(&self, id: AppointmentId) -> Result<bool, StoreError>;
    async fn appointments_for_professor(
        &self,
        professor_id: UserId,
    ) -> Result<Vec<Appointment>, StoreError>;

    // Atomic transitions
    /// Removes the slot from the professor's set and records the
    /// appointment, or changes nothing and returns `SlotTaken`.
    async fn reserve_slot(&self, appointment: NewAppointment) -> Result<Reservation, StoreError>;
    /// Deletes the appointment and returns its slot to the professor's set.
    async fn release_slot(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError>;
}
