use crate::schema::{appointments, availability_records, available_slots, users};
use crate::{
    backend::SchedulingBackend,
    error::StoreError,
    ledger::{Appointment, NewAppointment, Reservation},
    types::{AppointmentId, NewUser, SlotTime, User, UserId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = users, check_for_backend(diesel::pg::Pg))]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
}

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = appointments, check_for_backend(diesel::pg::Pg))]
struct AppointmentRow {
    id: Uuid,
    student_id: Uuid,
    professor_id: Uuid,
    slot: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = available_slots)]
struct SlotRow {
    professor_id: Uuid,
    slot: DateTime<Utc>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        Appointment {
            id: row.id,
            student_id: row.student_id,
            professor_id: row.professor_id,
            slot: row.slot.into(),
        }
    }
}

impl From<Appointment> for AppointmentRow {
    fn from(appointment: Appointment) -> Self {
        AppointmentRow {
            id: appointment.id,
            student_id: appointment.student_id,
            professor_id: appointment.professor_id,
            slot: appointment.slot.datetime(),
        }
    }
}

fn user_from_row(row: UserRow) -> Option<User> {
    match row.role.parse() {
        Ok(role) => Some(User {
            id: row.id,
            name: row.name,
            email: row.email,
            role,
        }),
        Err(err) => {
            warn!(user_id = %row.id, %err, "Ignoring user with unknown role");
            None
        }
    }
}

fn store_error(err: DieselError) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::Duplicate(info.message().to_string())
        }
        err => {
            error!(%err, "Database operation failed");
            StoreError::Unavailable(err.to_string())
        }
    }
}

/// Makes the server abort statements that run longer than the store timeout.
#[derive(Debug, Clone, Copy)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, connection: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.0.as_millis()))
            .execute(connection)
            .map(|_| ())
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// PostgreSQL backend. Diesel is blocking, so every call runs on the
/// blocking thread pool with a pooled connection.
#[derive(Clone)]
pub struct DatabaseInterface {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl DatabaseInterface {
    pub fn new(
        database_url: &str,
        pool_size: u32,
        store_timeout: Duration,
    ) -> Result<Self, PoolError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(store_timeout)
            .connection_customizer(Box::new(StatementTimeout(store_timeout)))
            .build(manager)?;
        Ok(Self { pool })
    }

    async fn run<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, DieselError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool
                .get()
                .map_err(|err| StoreError::Unavailable(format!("No database connection: {err}")))?;
            operation(&mut connection).map_err(store_error)
        })
        .await
        .map_err(|err| StoreError::Unavailable(format!("Database task failed: {err}")))?
    }
}

#[async_trait]
impl SchedulingBackend for DatabaseInterface {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = self
            .run(move |connection| {
                users::table
                    .find(id)
                    .select(UserRow::as_select())
                    .first(connection)
                    .optional()
            })
            .await?;
        Ok(row.and_then(user_from_row))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = UserRow {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            role: user.role.as_str().to_string(),
        };
        let row = self
            .run(move |connection| {
                diesel::insert_into(users::table)
                    .values(&row)
                    .execute(connection)
                    .map(|_| row)
            })
            .await?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            role: user.role,
        })
    }

    async fn add_slots(
        &self,
        professor_id: UserId,
        slots: &[SlotTime],
    ) -> Result<usize, StoreError> {
        let rows: Vec<SlotRow> = slots
            .iter()
            .map(|slot| SlotRow {
                professor_id,
                slot: slot.datetime(),
            })
            .collect();
        self.run(move |connection| {
            connection.transaction::<_, DieselError, _>(|connection| {
                diesel::insert_into(availability_records::table)
                    .values(availability_records::professor_id.eq(professor_id))
                    .on_conflict_do_nothing()
                    .execute(connection)?;
                if rows.is_empty() {
                    return Ok(0);
                }
                diesel::insert_into(available_slots::table)
                    .values(&rows)
                    .on_conflict_do_nothing()
                    .execute(connection)
            })
        })
        .await
    }

    async fn remove_slot(&self, professor_id: UserId, slot: SlotTime) -> Result<bool, StoreError> {
        let slot = slot.datetime();
        let removed = self
            .run(move |connection| {
                diesel::delete(
                    available_slots::table
                        .filter(available_slots::professor_id.eq(professor_id))
                        .filter(available_slots::slot.eq(slot)),
                )
                .execute(connection)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn contains_slot(
        &self,
        professor_id: UserId,
        slot: SlotTime,
    ) -> Result<bool, StoreError> {
        let slot = slot.datetime();
        self.run(move |connection| {
            diesel::select(diesel::dsl::exists(
                available_slots::table
                    .filter(available_slots::professor_id.eq(professor_id))
                    .filter(available_slots::slot.eq(slot)),
            ))
            .get_result::<bool>(connection)
        })
        .await
    }

    async fn available_slots(
        &self,
        professor_id: UserId,
    ) -> Result<Option<Vec<SlotTime>>, StoreError> {
        let slots = self
            .run(move |connection| {
                connection.transaction::<_, DieselError, _>(|connection| {
                    let record = availability_records::table
                        .find(professor_id)
                        .select(availability_records::professor_id)
                        .first::<Uuid>(connection)
                        .optional()?;
                    if record.is_none() {
                        return Ok(None);
                    }
                    available_slots::table
                        .filter(available_slots::professor_id.eq(professor_id))
                        .order(available_slots::slot.asc())
                        .select(available_slots::slot)
                        .load::<DateTime<Utc>>(connection)
                        .map(Some)
                })
            })
            .await?;
        Ok(slots.map(|slots| slots.into_iter().map(SlotTime::from).collect()))
    }

    async fn create_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, StoreError> {
        let row = AppointmentRow::from(appointment.into_appointment());
        let row = self
            .run(move |connection| {
                diesel::insert_into(appointments::table)
                    .values(&row)
                    .execute(connection)
                    .map(|_| row)
            })
            .await?;
        Ok(row.into())
    }

    async fn appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let row = self
            .run(move |connection| {
                appointments::table
                    .find(id)
                    .select(AppointmentRow::as_select())
                    .first(connection)
                    .optional()
            })
            .await?;
        Ok(row.map(Appointment::from))
    }

    async fn delete_appointment(&self, id: AppointmentId) -> Result<bool, StoreError> {
        let deleted = self
            .run(move |connection| {
                diesel::delete(appointments::table.find(id)).execute(connection)
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn appointments_for_professor(
        &self,
        professor_id: UserId,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self
            .run(move |connection| {
                appointments::table
                    .filter(appointments::professor_id.eq(professor_id))
                    .order((appointments::slot.asc(), appointments::id.asc()))
                    .select(AppointmentRow::as_select())
                    .load(connection)
            })
            .await?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    async fn reserve_slot(&self, appointment: NewAppointment) -> Result<Reservation, StoreError> {
        let row = AppointmentRow::from(appointment.into_appointment());
        let outcome = self
            .run(move |connection| {
                connection.transaction::<_, DieselError, _>(|connection| {
                    let claimed = diesel::delete(
                        available_slots::table
                            .filter(available_slots::professor_id.eq(row.professor_id))
                            .filter(available_slots::slot.eq(row.slot)),
                    )
                    .execute(connection)?;
                    if claimed == 0 {
                        return Ok(None);
                    }
                    diesel::insert_into(appointments::table)
                        .values(&row)
                        .execute(connection)?;
                    Ok(Some(row))
                })
            })
            .await;

        match outcome {
            Ok(Some(row)) => Ok(Reservation::Reserved(row.into())),
            Ok(None) => Ok(Reservation::SlotTaken),
            // the (professor_id, slot) index already holds a booking
            Err(StoreError::Duplicate(_)) => Ok(Reservation::SlotTaken),
            Err(err) => Err(err),
        }
    }

    async fn release_slot(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let row = self
            .run(move |connection| {
                connection.transaction::<_, DieselError, _>(|connection| {
                    let Some(row) = diesel::delete(appointments::table.find(id))
                        .get_result::<AppointmentRow>(connection)
                        .optional()?
                    else {
                        return Ok(None);
                    };
                    diesel::insert_into(availability_records::table)
                        .values(availability_records::professor_id.eq(row.professor_id))
                        .on_conflict_do_nothing()
                        .execute(connection)?;
                    diesel::insert_into(available_slots::table)
                        .values(SlotRow {
                            professor_id: row.professor_id,
                            slot: row.slot,
                        })
                        .on_conflict_do_nothing()
                        .execute(connection)?;
                    Ok(Some(row))
                })
            })
            .await?;
        Ok(row.map(Appointment::from))
    }
}
