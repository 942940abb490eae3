use hrflow_core::config::{AppConfig, LoadOptions};
use hrflow_db::migrations::MIGRATOR;
use hrflow_db::{connect_with_settings, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["database_connectivity", "migration_state", "hr_approver_pool"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("migration_state", "the async runtime did not start"),
                DoctorCheck::skipped("hr_approver_pool", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("migration_state", "the database is unreachable"),
                    DoctorCheck::skipped("hr_approver_pool", "the database is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];
        let migrated = check_migration_state(&pool).await;
        let schema_ready = migrated.status == CheckStatus::Pass;
        checks.push(migrated);
        checks.push(if schema_ready {
            check_hr_pool(&pool).await
        } else {
            DoctorCheck::skipped("hr_approver_pool", "the schema is not migrated")
        });

        pool.close().await;
        checks
    })
}

async fn check_migration_state(pool: &DbPool) -> DoctorCheck {
    let known = MIGRATOR.iter().filter(|migration| migration.migration_type.is_up_migration()).count();
    let applied = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await;

    match applied {
        Ok(applied) if usize::try_from(applied).is_ok_and(|applied| applied >= known) => {
            DoctorCheck::pass("migration_state", format!("{applied} of {known} migrations applied"))
        }
        Ok(applied) => DoctorCheck::fail(
            "migration_state",
            format!("{applied} of {known} migrations applied; run `hrflow migrate`"),
        ),
        Err(error) => DoctorCheck::fail(
            "migration_state",
            format!("migration ledger unavailable ({error}); run `hrflow migrate`"),
        ),
    }
}

async fn check_hr_pool(pool: &DbPool) -> DoctorCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM app_user WHERE role = 'hr' AND active = 1")
        .fetch_one(pool)
        .await
    {
        Ok(0) => DoctorCheck::fail(
            "hr_approver_pool",
            "no active HR users; policies requiring HR approval cannot route",
        ),
        Ok(count) => DoctorCheck::pass("hr_approver_pool", format!("{count} active HR approvers")),
        Err(error) => DoctorCheck::fail("hr_approver_pool", format!("query failed: {error}")),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
