use crate::commands::{with_database, CommandResult};
use hrflow_db::{HrSeedDataset, PolicySeedInfo};

pub fn run() -> CommandResult {
    let result = with_database("seed", |pool| async move {
        let seed_result = HrSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = HrSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed_checks), 6u8));
        }

        Ok(seed_result)
    });

    match result {
        Ok(seeded) => {
            let message = format!(
                "HR seed dataset loaded: {} offices, {} departments, {} users, {} absence types, {} work locations\n{}",
                seeded.offices,
                seeded.departments,
                seeded.users,
                seeded.absence_types,
                seeded.work_locations,
                describe_policies(&seeded.policies_seeded)
            );
            CommandResult::success("seed", message)
        }
        Err(failure) => failure,
    }
}

fn describe_policies(policies: &[PolicySeedInfo]) -> String {
    policies
        .iter()
        .map(|policy| format!("  - {} [{}]: {}", policy.workflow_id, policy.department_id, policy.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
