//! Reservation engine.
//!
//! The only place where slots move between a professor's available set and
//! the appointment ledger. Every operation on a professor runs under that
//! professor's lock; operations on different professors never wait on each
//! other. Every store call and every lock wait is bounded by
//! [`EngineSettings::store_timeout`].

use crate::{
    backend::SchedulingBackend,
    error::{SchedulingError, StoreError},
    ledger::{Appointment, NewAppointment, Reservation},
    slot_set::SlotSet,
    types::{AppointmentId, NewUser, Role, SlotTime, User, UserId},
};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, instrument, warn, Instrument};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound for a single store call or lock wait.
    pub store_timeout: Duration,
    /// Require the booking party to be a registered student.
    pub validate_students: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            validate_students: true,
        }
    }
}

type LockMap = HashMap<UserId, Arc<AsyncMutex<()>>>;

/// One async mutex per professor. Entries exist only while the lock is held
/// or awaited.
#[derive(Debug, Clone, Default)]
pub struct ProfessorLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl ProfessorLocks {
    pub async fn acquire(&self, professor_id: UserId) -> ProfessorGuard {
        let lock = self
            .lock_map()
            .entry(professor_id)
            .or_default()
            .clone();
        ProfessorGuard {
            guard: Some(lock.lock_owned().await),
            professor_id,
            locks: self.locks.clone(),
        }
    }

    /// Drops the entry for `professor_id` if nobody holds or awaits it.
    /// Needed after an abandoned `acquire`, which never yields a guard.
    pub fn release_idle(&self, professor_id: UserId) {
        remove_if_idle(&mut self.lock_map(), professor_id);
    }

    fn lock_map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock_map().len()
    }
}

// Clones are only made under the map lock, so a count of one seen under it
// means no holder and no waiter.
fn remove_if_idle(locks: &mut LockMap, professor_id: UserId) {
    if locks
        .get(&professor_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&professor_id);
    }
}

/// Held professor lock. Releasing it evicts the idle registry entry.
#[derive(Debug)]
pub struct ProfessorGuard {
    guard: Option<OwnedMutexGuard<()>>,
    professor_id: UserId,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for ProfessorGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        remove_if_idle(&mut locks, self.professor_id);
    }
}

#[derive(Debug, Clone)]
pub struct ReservationEngine<B> {
    backend: B,
    locks: ProfessorLocks,
    settings: EngineSettings,
}

impl<B: SchedulingBackend> ReservationEngine<B> {
    pub fn new(backend: B, settings: EngineSettings) -> Self {
        Self {
            backend,
            locks: ProfessorLocks::default(),
            settings,
        }
    }

    #[instrument(skip_all, fields(email = %user.email, role = %user.role))]
    pub async fn register_user(&self, user: NewUser) -> Result<User, SchedulingError> {
        let user = self.bounded("create_user", self.backend.create_user(user)).await?;
        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Publishes `slots` for the professor.
    ///
    /// Slots the professor currently has booked are acknowledged but stay
    /// with their booking; cancelling it returns them to the available set.
    #[instrument(skip_all, fields(%professor_id, slots = slots.len()))]
    pub async fn add_availability(
        &self,
        professor_id: UserId,
        slots: &[SlotTime],
    ) -> Result<(), SchedulingError> {
        self.require_role(professor_id, Role::Professor).await?;

        let _guard = self.lock_professor(professor_id).await?;
        let booked = self.booked_slots(professor_id).await?;
        let fresh: Vec<SlotTime> = slots
            .iter()
            .filter(|slot| !booked.contains(slot))
            .copied()
            .collect();

        let added = self
            .idempotent("add_slots", || self.backend.add_slots(professor_id, &fresh))
            .await?;
        info!(
            added,
            booked = slots.len() - fresh.len(),
            "Availability published"
        );
        Ok(())
    }

    /// Free slots of the professor in ascending order.
    #[instrument(skip_all, fields(%professor_id))]
    pub async fn query_availability(
        &self,
        professor_id: UserId,
    ) -> Result<Vec<SlotTime>, SchedulingError> {
        let _guard = self.lock_professor(professor_id).await?;
        let available: SlotSet = self
            .idempotent("available_slots", || {
                self.backend.available_slots(professor_id)
            })
            .await?
            .ok_or_else(|| {
                SchedulingError::NotFound(format!(
                    "No availability published for professor {professor_id}"
                ))
            })?
            .into_iter()
            .collect();

        // Recomputed against the ledger so records written before slots were
        // removed on booking still report correctly.
        let booked = self.booked_slots(professor_id).await?;
        Ok(available.free_slots(&booked))
    }

    #[instrument(skip_all, fields(%student_id, %professor_id, %slot))]
    pub async fn book(
        &self,
        student_id: UserId,
        professor_id: UserId,
        slot: SlotTime,
    ) -> Result<Appointment, SchedulingError> {
        self.require_role(professor_id, Role::Professor).await?;
        if self.settings.validate_students {
            self.require_role(student_id, Role::Student).await?;
        }

        let engine = self.clone();
        let appointment = NewAppointment {
            student_id,
            professor_id,
            slot,
        };
        run_to_completion(async move { engine.commit_booking(appointment).await }).await
    }

    /// Cancels the appointment and returns its slot to the professor.
    /// Only the professor who owns the appointment may cancel it.
    #[instrument(skip_all, fields(%requester_id, %appointment_id))]
    pub async fn cancel(
        &self,
        requester_id: UserId,
        appointment_id: AppointmentId,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self
            .idempotent("appointment", || self.backend.appointment(appointment_id))
            .await?
            .ok_or_else(|| appointment_not_found(appointment_id))?;

        if appointment.professor_id != requester_id {
            warn!("Cancellation requested by someone other than the owning professor");
            return Err(SchedulingError::Forbidden(format!(
                "Appointment {appointment_id} belongs to another professor"
            )));
        }

        let engine = self.clone();
        run_to_completion(async move { engine.commit_cancellation(appointment).await }).await
    }

    /// The professor's active appointments, ordered by slot.
    #[instrument(skip_all, fields(%requester_id, %professor_id))]
    pub async fn list_appointments(
        &self,
        requester_id: UserId,
        professor_id: UserId,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if requester_id != professor_id {
            return Err(SchedulingError::Forbidden(
                "Appointments are only visible to their professor".into(),
            ));
        }
        self.idempotent("appointments_for_professor", || {
            self.backend.appointments_for_professor(professor_id)
        })
        .await
    }

    async fn commit_booking(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self.lock_professor(appointment.professor_id).await?;

        let available = self
            .idempotent("contains_slot", || {
                self.backend
                    .contains_slot(appointment.professor_id, appointment.slot)
            })
            .await?;
        if !available {
            warn!("Slot is not available");
            return Err(SchedulingError::SlotUnavailable(format!(
                "Slot {} is not available",
                appointment.slot
            )));
        }

        // Not retried: a timed out commit may still have been applied.
        match self
            .bounded("reserve_slot", self.backend.reserve_slot(appointment))
            .await?
        {
            Reservation::Reserved(appointment) => {
                info!(appointment_id = %appointment.id, "Appointment booked");
                Ok(appointment)
            }
            Reservation::SlotTaken => {
                warn!("Slot was claimed between check and commit");
                Err(SchedulingError::Conflict(format!(
                    "Slot {} was booked concurrently",
                    appointment.slot
                )))
            }
        }
    }

    async fn commit_cancellation(
        &self,
        appointment: Appointment,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self.lock_professor(appointment.professor_id).await?;

        match self
            .bounded("release_slot", self.backend.release_slot(appointment.id))
            .await?
        {
            Some(released) => {
                info!(slot = %released.slot, "Appointment cancelled, slot available again");
                Ok(released)
            }
            None => Err(appointment_not_found(appointment.id)),
        }
    }

    async fn require_role(&self, user_id: UserId, role: Role) -> Result<User, SchedulingError> {
        match self
            .idempotent("user", || self.backend.user(user_id))
            .await?
        {
            Some(user) if user.role == role => Ok(user),
            Some(user) => {
                warn!(%user_id, expected = %role, actual = %user.role, "Party has the wrong role");
                Err(SchedulingError::InvalidParty(format!(
                    "User {user_id} is not a {role}"
                )))
            }
            None => {
                warn!(%user_id, "Unknown party");
                Err(SchedulingError::InvalidParty(format!(
                    "User {user_id} does not exist"
                )))
            }
        }
    }

    async fn booked_slots(&self, professor_id: UserId) -> Result<HashSet<SlotTime>, SchedulingError> {
        let appointments = self
            .idempotent("appointments_for_professor", || {
                self.backend.appointments_for_professor(professor_id)
            })
            .await?;
        Ok(appointments
            .into_iter()
            .map(|appointment| appointment.slot)
            .collect())
    }

    async fn lock_professor(&self, professor_id: UserId) -> Result<ProfessorGuard, SchedulingError> {
        let acquired =
            tokio::time::timeout(self.settings.store_timeout, self.locks.acquire(professor_id))
                .await;
        match acquired {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.locks.release_idle(professor_id);
                warn!(%professor_id, "Timed out waiting for professor lock");
                Err(SchedulingError::TransientStoreFailure(format!(
                    "Professor {professor_id} is busy, try again"
                )))
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SchedulingError> {
        match tokio::time::timeout(self.settings.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(operation, %err, "Store call failed");
                Err(err.into())
            }
            Err(_) => {
                warn!(operation, timeout = ?self.settings.store_timeout, "Store call timed out");
                Err(SchedulingError::TransientStoreFailure(format!(
                    "{operation} timed out after {:?}",
                    self.settings.store_timeout
                )))
            }
        }
    }

    /// Like `bounded`, but retries once on a transient failure. Only for
    /// calls that can be repeated without changing the outcome.
    async fn idempotent<T, F, Fut>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, SchedulingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match self.bounded(operation, call()).await {
            Err(err) if err.is_transient() => {
                warn!(operation, "Retrying store call");
                self.bounded(operation, call()).await
            }
            result => result,
        }
    }
}

fn appointment_not_found(appointment_id: AppointmentId) -> SchedulingError {
    SchedulingError::NotFound(format!("Appointment {appointment_id} does not exist"))
}

/// Runs a commit on its own task so it is not cut short when the caller's
/// future is dropped.
async fn run_to_completion<T, F>(commit: F) -> Result<T, SchedulingError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, SchedulingError>> + Send + 'static,
{
    match tokio::spawn(commit.in_current_span()).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(SchedulingError::TransientStoreFailure(format!(
            "Commit task did not finish: {err}"
        ))),
    }
}
