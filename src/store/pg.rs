//! Postgres backend. Plain SQL per kind, no query macros, so the crate builds
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, PgPool};
use uuid::Uuid;

use super::{classify, CredentialStore, ListQuery, Listing, ResourceStore, StoreError};
use crate::middleware::auth_context::{AuthContext, SessionResolver};
use crate::models::{
    AnalysisRecord, Appointment, AppointmentStatus, Doctor, NewAnalysisRecord, NewAppointment,
    NewDoctor, NewProduct, NewUser, Product, Role, Severity, User,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `%needle%` for `ILIKE`, with the pattern metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// SQL for one kind's `list`. Both statements bind `$1` owner (nullable
/// BIGINT) and `$2` ILIKE pattern (nullable TEXT); `select` also binds `$3`
/// limit (NULL = all) and `$4` offset.
struct ListSql {
    select: &'static str,
    count: &'static str,
}

async fn run_list<Row, R>(
    pool: &PgPool,
    sql: &ListSql,
    query: &ListQuery,
) -> Result<Listing<R>, StoreError>
where
    Row: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    R: TryFrom<Row, Error = StoreError>,
{
    let pattern = query.search.as_deref().map(like_pattern);
    let (limit, offset) = match query.window {
        Some(w) => (Some(w.limit as i64), w.offset as i64),
        None => (None, 0),
    };

    let total: i64 = sqlx::query_scalar(sql.count)
        .bind(query.owner)
        .bind(pattern.as_deref())
        .fetch_one(pool)
        .await?;

    let rows: Vec<Row> = sqlx::query_as::<_, Row>(sql.select)
        .bind(query.owner)
        .bind(pattern.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let items = rows
        .into_iter()
        .map(R::try_from)
        .collect::<Result<Vec<R>, StoreError>>()?;
    Ok(Listing {
        items,
        total: total.max(0) as u64,
    })
}

async fn run_delete(pool: &PgPool, sql: &str, id: i64) -> Result<bool, StoreError> {
    let res = sqlx::query(sql).bind(id).execute(pool).await?;
    Ok(res.rows_affected() > 0)
}

/* ============================================================
   Users
   ============================================================ */

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    email: String,
    name: String,
    role: String,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let role = r
            .role
            .parse::<Role>()
            .map_err(|_| StoreError::Corrupt(format!("app_user {}: role {:?}", r.user_id, r.role)))?;
        Ok(User {
            user_id: r.user_id,
            email: r.email,
            name: r.name,
            role,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn password_hash(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar::<_, String>(
            r#"
            SELECT password_hash
            FROM app_user
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_password_hash(&self, user_id: i64, hash: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE app_user
            SET password_hash = $2, updated_at = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}

const USER_LIST: ListSql = ListSql {
    select: r#"
        SELECT user_id, email, name, role
        FROM app_user
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR email ILIKE $2)
        ORDER BY user_id ASC
        LIMIT $3 OFFSET $4
        "#,
    count: r#"
        SELECT COUNT(*)
        FROM app_user
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR email ILIKE $2)
        "#,
};

#[async_trait]
impl ResourceStore<User> for PgStore {
    async fn create(&self, d: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO app_user (email, name, role, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING user_id, email, name, role
            "#,
        )
        .bind(&d.email)
        .bind(&d.name)
        .bind(d.role.as_str())
        .bind(&d.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, email, name, role
            FROM app_user
            WHERE user_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn update(&self, u: &User) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE app_user
            SET email = $2, name = $3, role = $4, updated_at = now()
            WHERE user_id = $1
            RETURNING user_id, email, name, role
            "#,
        )
        .bind(u.user_id)
        .bind(&u.email)
        .bind(&u.name)
        .bind(u.role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(User::try_from)
        .transpose()
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        run_delete(&self.pool, "DELETE FROM app_user WHERE user_id = $1", id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<User>, StoreError> {
        run_list::<UserRow, User>(&self.pool, &USER_LIST, query).await
    }
}

/* ============================================================
   Doctors
   ============================================================ */

#[derive(Debug, FromRow)]
struct DoctorRow {
    doctor_id: i64,
    name: String,
    qualifications: String,
    speciality: String,
}

impl TryFrom<DoctorRow> for Doctor {
    type Error = StoreError;

    fn try_from(r: DoctorRow) -> Result<Self, Self::Error> {
        Ok(Doctor {
            doctor_id: r.doctor_id,
            name: r.name,
            qualifications: r.qualifications,
            speciality: r.speciality,
        })
    }
}

// Doctors have no owner; any owner filter matches nothing.
const DOCTOR_LIST: ListSql = ListSql {
    select: r#"
        SELECT doctor_id, name, qualifications, speciality
        FROM doctor
        WHERE $1::BIGINT IS NULL
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR qualifications ILIKE $2 OR speciality ILIKE $2)
        ORDER BY doctor_id ASC
        LIMIT $3 OFFSET $4
        "#,
    count: r#"
        SELECT COUNT(*)
        FROM doctor
        WHERE $1::BIGINT IS NULL
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR qualifications ILIKE $2 OR speciality ILIKE $2)
        "#,
};

#[async_trait]
impl ResourceStore<Doctor> for PgStore {
    async fn create(&self, d: NewDoctor) -> Result<Doctor, StoreError> {
        let row = sqlx::query_as::<_, DoctorRow>(
            r#"
            INSERT INTO doctor (name, qualifications, speciality)
            VALUES ($1, $2, $3)
            RETURNING doctor_id, name, qualifications, speciality
            "#,
        )
        .bind(&d.name)
        .bind(&d.qualifications)
        .bind(&d.speciality)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Doctor>, StoreError> {
        sqlx::query_as::<_, DoctorRow>(
            "SELECT doctor_id, name, qualifications, speciality FROM doctor WHERE doctor_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Doctor::try_from)
        .transpose()
    }

    async fn update(&self, doc: &Doctor) -> Result<Option<Doctor>, StoreError> {
        sqlx::query_as::<_, DoctorRow>(
            r#"
            UPDATE doctor
            SET name = $2, qualifications = $3, speciality = $4
            WHERE doctor_id = $1
            RETURNING doctor_id, name, qualifications, speciality
            "#,
        )
        .bind(doc.doctor_id)
        .bind(&doc.name)
        .bind(&doc.qualifications)
        .bind(&doc.speciality)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(Doctor::try_from)
        .transpose()
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        run_delete(&self.pool, "DELETE FROM doctor WHERE doctor_id = $1", id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<Doctor>, StoreError> {
        run_list::<DoctorRow, Doctor>(&self.pool, &DOCTOR_LIST, query).await
    }
}

/* ============================================================
   Products
   ============================================================ */

#[derive(Debug, FromRow)]
struct ProductRow {
    product_id: i64,
    name: String,
    brand: String,
    description: String,
    image_link: String,
    product_link: String,
    skin_type: String,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            product_id: r.product_id,
            name: r.name,
            brand: r.brand,
            description: r.description,
            image_link: r.image_link,
            product_link: r.product_link,
            skin_type: r.skin_type,
        })
    }
}

const PRODUCT_LIST: ListSql = ListSql {
    select: r#"
        SELECT product_id, name, brand, description, image_link, product_link, skin_type
        FROM product
        WHERE $1::BIGINT IS NULL
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR brand ILIKE $2
               OR skin_type ILIKE $2 OR description ILIKE $2)
        ORDER BY product_id ASC
        LIMIT $3 OFFSET $4
        "#,
    count: r#"
        SELECT COUNT(*)
        FROM product
        WHERE $1::BIGINT IS NULL
          AND ($2::TEXT IS NULL OR name ILIKE $2 OR brand ILIKE $2
               OR skin_type ILIKE $2 OR description ILIKE $2)
        "#,
};

#[async_trait]
impl ResourceStore<Product> for PgStore {
    async fn create(&self, d: NewProduct) -> Result<Product, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            INSERT INTO product (name, brand, description, image_link, product_link, skin_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING product_id, name, brand, description, image_link, product_link, skin_type
            "#,
        )
        .bind(&d.name)
        .bind(&d.brand)
        .bind(&d.description)
        .bind(&d.image_link)
        .bind(&d.product_link)
        .bind(&d.skin_type)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT product_id, name, brand, description, image_link, product_link, skin_type
            FROM product
            WHERE product_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Product::try_from)
        .transpose()
    }

    async fn update(&self, p: &Product) -> Result<Option<Product>, StoreError> {
        sqlx::query_as::<_, ProductRow>(
            r#"
            UPDATE product
            SET name = $2, brand = $3, description = $4,
                image_link = $5, product_link = $6, skin_type = $7
            WHERE product_id = $1
            RETURNING product_id, name, brand, description, image_link, product_link, skin_type
            "#,
        )
        .bind(p.product_id)
        .bind(&p.name)
        .bind(&p.brand)
        .bind(&p.description)
        .bind(&p.image_link)
        .bind(&p.product_link)
        .bind(&p.skin_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(Product::try_from)
        .transpose()
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        run_delete(&self.pool, "DELETE FROM product WHERE product_id = $1", id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<Product>, StoreError> {
        run_list::<ProductRow, Product>(&self.pool, &PRODUCT_LIST, query).await
    }
}

/* ============================================================
   Appointments
   ============================================================ */

#[derive(Debug, FromRow)]
struct AppointmentRow {
    appointment_id: i64,
    user_id: Option<i64>,
    user_name: String,
    user_email: String,
    doctor_name: String,
    date: DateTime<Utc>,
    status: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        let status = r.status.parse::<AppointmentStatus>().map_err(|_| {
            StoreError::Corrupt(format!("appointment {}: status {:?}", r.appointment_id, r.status))
        })?;
        Ok(Appointment {
            appointment_id: r.appointment_id,
            user_id: r.user_id,
            user_name: r.user_name,
            user_email: r.user_email,
            doctor_name: r.doctor_name,
            date: r.date,
            status,
        })
    }
}

const APPOINTMENT_LIST: ListSql = ListSql {
    select: r#"
        SELECT appointment_id, user_id, user_name, user_email, doctor_name, date, status
        FROM appointment
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR user_name ILIKE $2 OR user_email ILIKE $2
               OR doctor_name ILIKE $2 OR status ILIKE $2
               OR EXISTS (SELECT 1 FROM app_user u
                          WHERE u.user_id = appointment.user_id AND u.email ILIKE $2))
        ORDER BY appointment_id DESC
        LIMIT $3 OFFSET $4
        "#,
    count: r#"
        SELECT COUNT(*)
        FROM appointment
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR user_name ILIKE $2 OR user_email ILIKE $2
               OR doctor_name ILIKE $2 OR status ILIKE $2
               OR EXISTS (SELECT 1 FROM app_user u
                          WHERE u.user_id = appointment.user_id AND u.email ILIKE $2))
        "#,
};

#[async_trait]
impl ResourceStore<Appointment> for PgStore {
    async fn create(&self, d: NewAppointment) -> Result<Appointment, StoreError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            INSERT INTO appointment (user_id, user_name, user_email, doctor_name, date, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING appointment_id, user_id, user_name, user_email, doctor_name, date, status
            "#,
        )
        .bind(d.user_id)
        .bind(&d.user_name)
        .bind(&d.user_email)
        .bind(&d.doctor_name)
        .bind(d.date)
        .bind(d.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT appointment_id, user_id, user_name, user_email, doctor_name, date, status
            FROM appointment
            WHERE appointment_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Appointment::try_from)
        .transpose()
    }

    async fn update(&self, a: &Appointment) -> Result<Option<Appointment>, StoreError> {
        sqlx::query_as::<_, AppointmentRow>(
            r#"
            UPDATE appointment
            SET user_id = $2, user_name = $3, user_email = $4,
                doctor_name = $5, date = $6, status = $7, updated_at = now()
            WHERE appointment_id = $1
            RETURNING appointment_id, user_id, user_name, user_email, doctor_name, date, status
            "#,
        )
        .bind(a.appointment_id)
        .bind(a.user_id)
        .bind(&a.user_name)
        .bind(&a.user_email)
        .bind(&a.doctor_name)
        .bind(a.date)
        .bind(a.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(Appointment::try_from)
        .transpose()
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        run_delete(&self.pool, "DELETE FROM appointment WHERE appointment_id = $1", id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<Appointment>, StoreError> {
        run_list::<AppointmentRow, Appointment>(&self.pool, &APPOINTMENT_LIST, query).await
    }
}

/* ============================================================
   Analysis records
   ============================================================ */

#[derive(Debug, FromRow)]
struct AnalysisRow {
    history_id: i64,
    user_id: i64,
    severity: String,
    confidence: f64,
    diagnosis: String,
    suggestion: String,
    analysis_time: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for AnalysisRecord {
    type Error = StoreError;

    fn try_from(r: AnalysisRow) -> Result<Self, Self::Error> {
        let severity = r.severity.parse::<Severity>().map_err(|_| {
            StoreError::Corrupt(format!("analysis_record {}: severity {:?}", r.history_id, r.severity))
        })?;
        Ok(AnalysisRecord {
            history_id: r.history_id,
            user_id: r.user_id,
            severity,
            confidence: r.confidence,
            diagnosis: r.diagnosis,
            suggestion: r.suggestion,
            analysis_time: r.analysis_time,
        })
    }
}

const ANALYSIS_LIST: ListSql = ListSql {
    select: r#"
        SELECT history_id, user_id, severity, confidence, diagnosis, suggestion, analysis_time
        FROM analysis_record
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR severity ILIKE $2 OR diagnosis ILIKE $2 OR suggestion ILIKE $2)
        ORDER BY history_id DESC
        LIMIT $3 OFFSET $4
        "#,
    count: r#"
        SELECT COUNT(*)
        FROM analysis_record
        WHERE ($1::BIGINT IS NULL OR user_id = $1)
          AND ($2::TEXT IS NULL OR severity ILIKE $2 OR diagnosis ILIKE $2 OR suggestion ILIKE $2)
        "#,
};

#[async_trait]
impl ResourceStore<AnalysisRecord> for PgStore {
    async fn create(&self, d: NewAnalysisRecord) -> Result<AnalysisRecord, StoreError> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO analysis_record
                (user_id, severity, confidence, diagnosis, suggestion, analysis_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING history_id, user_id, severity, confidence, diagnosis, suggestion, analysis_time
            "#,
        )
        .bind(d.user_id)
        .bind(d.severity.as_str())
        .bind(d.confidence)
        .bind(&d.diagnosis)
        .bind(&d.suggestion)
        .bind(d.analysis_time)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<AnalysisRecord>, StoreError> {
        sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT history_id, user_id, severity, confidence, diagnosis, suggestion, analysis_time
            FROM analysis_record
            WHERE history_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(AnalysisRecord::try_from)
        .transpose()
    }

    async fn update(&self, a: &AnalysisRecord) -> Result<Option<AnalysisRecord>, StoreError> {
        sqlx::query_as::<_, AnalysisRow>(
            r#"
            UPDATE analysis_record
            SET user_id = $2, severity = $3, confidence = $4,
                diagnosis = $5, suggestion = $6, analysis_time = $7
            WHERE history_id = $1
            RETURNING history_id, user_id, severity, confidence, diagnosis, suggestion, analysis_time
            "#,
        )
        .bind(a.history_id)
        .bind(a.user_id)
        .bind(a.severity.as_str())
        .bind(a.confidence)
        .bind(&a.diagnosis)
        .bind(&a.suggestion)
        .bind(a.analysis_time)
        .fetch_optional(&self.pool)
        .await?
        .map(AnalysisRecord::try_from)
        .transpose()
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        run_delete(&self.pool, "DELETE FROM analysis_record WHERE history_id = $1", id).await
    }

    async fn list(&self, query: &ListQuery) -> Result<Listing<AnalysisRecord>, StoreError> {
        run_list::<AnalysisRow, AnalysisRecord>(&self.pool, &ANALYSIS_LIST, query).await
    }
}

/* ============================================================
   Sessions
   ============================================================ */

#[derive(Debug, FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: i64,
    email: String,
    name: String,
    role: String,
}

/// Reads sessions issued by the identity service into `session_token`.
#[derive(Clone)]
pub struct PgSessions {
    pool: PgPool,
}

impl PgSessions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionResolver for PgSessions {
    async fn resolve(&self, token_hash: &str) -> Result<Option<AuthContext>, StoreError> {
        let Some(row) = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, u.user_id, u.email, u.name, u.role
            FROM session_token st
            JOIN app_user u ON u.user_id = st.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > now()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        // Touch last_seen_at (best-effort)
        if let Err(e) = sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(row.session_token_id)
        .execute(&self.pool)
        .await
        {
            tracing::debug!(error = %e, "last_seen_at touch failed");
        }

        let role = row.role.parse::<Role>().map_err(|_| {
            StoreError::Corrupt(format!("app_user {}: role {:?}", row.user_id, row.role))
        })?;
        Ok(Some(AuthContext {
            user_id: row.user_id,
            email: row.email,
            name: row.name,
            role,
            session_token_id: row.session_token_id,
        }))
    }

    async fn revoke_others(&self, user_id: i64, keep: Uuid) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE session_token
            SET revoked_at = now()
            WHERE user_id = $1
              AND revoked_at IS NULL
              AND expires_at > now()
              AND session_token_id <> $2
            "#,
        )
        .bind(user_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
