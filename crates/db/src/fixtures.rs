use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Expected routing shape of each seeded policy.
const SEED_POLICIES: &[SeedPolicyContract] = &[
    SeedPolicyContract {
        workflow_id: "wf-eng-annual",
        department_id: "dept-eng",
        absence_type_code: "AL",
        required_levels: &["department_manager", "office_director", "hr"],
        description: "Engineering annual leave: manager, office director, HR",
    },
    SeedPolicyContract {
        workflow_id: "wf-eng-sick",
        department_id: "dept-eng",
        absence_type_code: "SL",
        required_levels: &["department_manager", "hr"],
        description: "Engineering sick leave: manager then HR",
    },
    SeedPolicyContract {
        workflow_id: "wf-ops-annual",
        department_id: "dept-ops",
        absence_type_code: "AL",
        required_levels: &["department_manager", "office_director"],
        description: "Operations annual leave: manager then office director",
    },
    SeedPolicyContract {
        workflow_id: "wf-ops-wfh",
        department_id: "dept-ops",
        absence_type_code: "WFH",
        required_levels: &[],
        description: "Operations work from home: approved on filing",
    },
];

const SEED_OFFICE_IDS: &[&str] = &["off-hn", "off-hcm"];

const SEED_DEPARTMENT_IDS: &[&str] = &["dept-eng", "dept-ops", "dept-hr"];

const SEED_USER_IDS: &[&str] = &[
    "u-emp-eng",
    "u-mgr-eng",
    "u-dep-eng",
    "u-emp-ops",
    "u-mgr-ops",
    "u-dir-hn",
    "u-dpdir-hn",
    "u-dir-hcm",
    "u-hr-lead",
    "u-hr-01",
    "u-admin",
];

const SEED_ABSENCE_TYPE_IDS: &[&str] = &["at-annual", "at-sick", "at-unpaid", "at-wfh"];

const SEED_LOCATION_IDS: &[&str] = &["loc-hn", "loc-hcm"];

/// Deterministic demo organization used by `hrflow seed` and the integration tests.
pub struct HrSeedDataset;

impl HrSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/hr_seed_data.sql");

    /// Loads the dataset in one transaction. Existing rows are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let policies_seeded = SEED_POLICIES
            .iter()
            .map(|policy| PolicySeedInfo {
                workflow_id: policy.workflow_id,
                department_id: policy.department_id,
                description: policy.description,
            })
            .collect();

        Ok(SeedResult {
            offices: SEED_OFFICE_IDS.len(),
            departments: SEED_DEPARTMENT_IDS.len(),
            users: SEED_USER_IDS.len(),
            absence_types: SEED_ABSENCE_TYPE_IDS.len(),
            work_locations: SEED_LOCATION_IDS.len(),
            policies_seeded,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        checks.push(("offices", count_ids(pool, "office", SEED_OFFICE_IDS).await?));
        checks.push(("departments", count_ids(pool, "department", SEED_DEPARTMENT_IDS).await?));
        checks.push(("users", count_ids(pool, "app_user", SEED_USER_IDS).await?));
        checks.push((
            "absence-types",
            count_ids(pool, "absence_type", SEED_ABSENCE_TYPE_IDS).await?,
        ));
        checks.push(("work-locations", count_ids(pool, "work_location", SEED_LOCATION_IDS).await?));

        let active_hr: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM app_user WHERE role = 'hr' AND active = 1")
                .fetch_one(pool)
                .await?;
        checks.push(("active-hr-pool", active_hr > 0));

        for policy in SEED_POLICIES {
            checks.push((policy.workflow_id, Self::verify_policy(pool, policy).await?));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_policy(pool: &DbPool, policy: &SeedPolicyContract) -> Result<bool, RepositoryError> {
        let row = sqlx::query_as::<_, (bool, bool, bool, bool, bool)>(
            "SELECT w.department_manager_required, w.department_deputy_required,
                    w.office_director_required, w.office_deputy_required, w.hr_required
             FROM approval_workflow w
             JOIN absence_type t ON t.id = w.absence_type_id
             WHERE w.id = ?1 AND w.department_id = ?2 AND t.code = ?3",
        )
        .bind(policy.workflow_id)
        .bind(policy.department_id)
        .bind(policy.absence_type_code)
        .fetch_optional(pool)
        .await?;

        let Some((manager, deputy, director, office_deputy, hr)) = row else {
            return Ok(false);
        };
        let flags = [
            ("department_manager", manager),
            ("department_deputy", deputy),
            ("office_director", director),
            ("office_deputy", office_deputy),
            ("hr", hr),
        ];
        let required: Vec<&str> =
            flags.iter().filter(|(_, required)| *required).map(|(level, _)| *level).collect();

        Ok(required == policy.required_levels)
    }

    /// Removes the dataset together with any requests and attendance filed against it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let users = sql_array_from_ids(SEED_USER_IDS);

        for statement in [
            format!("DELETE FROM attendance_record WHERE user_id IN {users}"),
            format!("DELETE FROM absence_request WHERE requester_id IN {users}"),
            format!(
                "DELETE FROM approval_workflow WHERE department_id IN {}",
                sql_array_from_ids(SEED_DEPARTMENT_IDS)
            ),
            format!("DELETE FROM work_location WHERE id IN {}", sql_array_from_ids(SEED_LOCATION_IDS)),
            format!(
                "DELETE FROM absence_type WHERE id IN {}",
                sql_array_from_ids(SEED_ABSENCE_TYPE_IDS)
            ),
            format!("DELETE FROM app_user WHERE id IN {users}"),
            format!("DELETE FROM department WHERE id IN {}", sql_array_from_ids(SEED_DEPARTMENT_IDS)),
            format!("DELETE FROM office WHERE id IN {}", sql_array_from_ids(SEED_OFFICE_IDS)),
        ] {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedPolicyContract {
    workflow_id: &'static str,
    department_id: &'static str,
    absence_type_code: &'static str,
    required_levels: &'static [&'static str],
    description: &'static str,
}

async fn count_ids(pool: &DbPool, table: &str, ids: &[&str]) -> Result<bool, RepositoryError> {
    let quoted = sql_array_from_ids(ids);
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table} WHERE id IN {quoted}"))
        .fetch_one(pool)
        .await?;
    Ok(usize::try_from(count).is_ok_and(|count| count == ids.len()))
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub offices: usize,
    pub departments: usize,
    pub users: usize,
    pub absence_types: usize,
    pub work_locations: usize,
    pub policies_seeded: Vec<PolicySeedInfo>,
}

#[derive(Debug)]
pub struct PolicySeedInfo {
    pub workflow_id: &'static str,
    pub department_id: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
