use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    backend::SchedulingBackend,
    configuration::Configuration,
    error::StoreError,
    ledger::{Appointment, NewAppointment, Reservation},
    local_scheduling::LocalScheduling,
    types::{AppointmentId, NewUser, SlotTime, User, UserId},
};

/// In-memory backend with call counters and failure injection.
pub struct MockSchedulingBackendInner {
    pub local: LocalScheduling,
    /// The next `n` calls fail with `StoreError::Unavailable`.
    pub transient_failures: AtomicU32,
    /// Every call pends forever.
    pub stall: AtomicBool,
    /// `reserve_slot` and `release_slot` fail with `StoreError::Unavailable`.
    pub fail_commits: AtomicBool,
    /// `reserve_slot` sleeps this long before committing.
    pub commit_delay_ms: AtomicU64,
    /// Another instance claims the slot right before `reserve_slot` commits.
    pub steal_on_reserve: AtomicBool,
    pub calls_to_user: AtomicU64,
    pub calls_to_add_slots: AtomicU64,
    pub calls_to_contains_slot: AtomicU64,
    pub calls_to_available_slots: AtomicU64,
    pub calls_to_reserve_slot: AtomicU64,
    pub calls_to_release_slot: AtomicU64,
}

#[derive(Clone)]
pub struct MockSchedulingBackend(pub Arc<MockSchedulingBackendInner>);

impl MockSchedulingBackendInner {
    fn new() -> Self {
        Self {
            local: LocalScheduling::default(),
            transient_failures: AtomicU32::default(),
            stall: AtomicBool::default(),
            fail_commits: AtomicBool::default(),
            commit_delay_ms: AtomicU64::default(),
            steal_on_reserve: AtomicBool::default(),
            calls_to_user: AtomicU64::default(),
            calls_to_add_slots: AtomicU64::default(),
            calls_to_contains_slot: AtomicU64::default(),
            calls_to_available_slots: AtomicU64::default(),
            calls_to_reserve_slot: AtomicU64::default(),
            calls_to_release_slot: AtomicU64::default(),
        }
    }
}

impl MockSchedulingBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockSchedulingBackendInner::new()))
    }

    async fn result(&self) -> Result<(), StoreError> {
        if self.0.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .0
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        match failing {
            true => Err(StoreError::Unavailable("Supposed to fail".into())),
            false => Ok(()),
        }
    }

    fn commit_result(&self) -> Result<(), StoreError> {
        match self.0.fail_commits.load(Ordering::SeqCst) {
            true => Err(StoreError::Unavailable("Commit supposed to fail".into())),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl SchedulingBackend for MockSchedulingBackend {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.0.calls_to_user.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0.local.user(id).await
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.result().await?;
        self.0.local.create_user(user).await
    }

    async fn add_slots(
        &self,
        professor_id: UserId,
        slots: &[SlotTime],
    ) -> Result<usize, StoreError> {
        self.0.calls_to_add_slots.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0.local.add_slots(professor_id, slots).await
    }

    async fn remove_slot(&self, professor_id: UserId, slot: SlotTime) -> Result<bool, StoreError> {
        self.result().await?;
        self.0.local.remove_slot(professor_id, slot).await
    }

    async fn contains_slot(
        &self,
        professor_id: UserId,
        slot: SlotTime,
    ) -> Result<bool, StoreError> {
        self.0.calls_to_contains_slot.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0.local.contains_slot(professor_id, slot).await
    }

    async fn available_slots(
        &self,
        professor_id: UserId,
    ) -> Result<Option<Vec<SlotTime>>, StoreError> {
        self.0
            .calls_to_available_slots
            .fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0.local.available_slots(professor_id).await
    }

    async fn create_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, StoreError> {
        self.result().await?;
        self.0.local.create_appointment(appointment).await
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        self.result().await?;
        self.0.local.appointment(id).await
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<bool, StoreError> {
        self.result().await?;
        self.0.local.delete_appointment(id).await
    }

    async fn appointments_for_professor(
        &self,
        professor_id: UserId,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.result().await?;
        self.0.local.appointments_for_professor(professor_id).await
    }

    async fn reserve_slot(&self, appointment: NewAppointment) -> Result<Reservation, StoreError> {
        self.0.calls_to_reserve_slot.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.commit_result()?;

        let delay = self.0.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.0.steal_on_reserve.load(Ordering::SeqCst) {
            self.0
                .local
                .remove_slot(appointment.professor_id, appointment.slot)
                .await?;
        }
        self.0.local.reserve_slot(appointment).await
    }

    async fn release_slot(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        self.0.calls_to_release_slot.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.commit_result()?;
        self.0.local.release_slot(id).await
    }
}

#[derive(Clone)]
pub struct TestConfiguration {
    pub store_timeout: Duration,
    pub validate_students: bool,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            validate_students: true,
        }
    }
}

impl Configuration for TestConfiguration {
    fn port(&self) -> u16 {
        0
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn database_pool_size(&self) -> u32 {
        1
    }

    fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    fn validate_students(&self) -> bool {
        self.validate_students
    }
}
