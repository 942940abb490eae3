use chrono::{NaiveDate, NaiveTime};
use clap::Args;
use serde_json::json;

use hrflow_core::domain::absence::{AbsenceRequestId, AbsenceTypeId};
use hrflow_core::domain::org::UserId;
use hrflow_core::workflow::ports::AbsenceRequestStore;
use hrflow_core::workflow::{ensure_current_approver, ApprovalDecision, NewAbsenceRequest};
use hrflow_db::{
    sql_workflow_engine, DbPool, SqlAbsenceRequestRepository, SqlAbsenceTypeRepository,
};

use crate::commands::{
    repository_failure, to_data, with_database, workflow_failure, CommandResult,
    Failure,
};

#[derive(Debug, Clone, Args)]
pub struct FileArgs {
    #[arg(long, help = "Requesting user id")]
    pub user: String,
    #[arg(long = "type", help = "Absence type code (e.g. AL) or id")]
    pub absence_type: String,
    #[arg(long, help = "First day, YYYY-MM-DD")]
    pub start: NaiveDate,
    #[arg(long, help = "Last day, YYYY-MM-DD")]
    pub end: NaiveDate,
    #[arg(long, help = "Start time for partial days, HH:MM:SS")]
    pub start_time: Option<NaiveTime>,
    #[arg(long, help = "End time for partial days, HH:MM:SS")]
    pub end_time: Option<NaiveTime>,
    #[arg(long, default_value = "")]
    pub reason: String,
    #[arg(long, help = "Path of a supporting document")]
    pub attachment: Option<String>,
}

pub fn file(args: FileArgs) -> CommandResult {
    let result = with_database("request.file", |pool| async move {
        if args.end < args.start {
            return Err((
                "invalid_input",
                format!("end date {} precedes start date {}", args.end, args.start),
                6u8,
            ));
        }
        let absence_type_id = resolve_absence_type(&pool, &args.absence_type).await?;

        sql_workflow_engine(&pool)
            .create_absence_request(NewAbsenceRequest {
                requester_id: UserId(args.user),
                absence_type_id,
                start_date: args.start,
                end_date: args.end,
                start_time: args.start_time,
                end_time: args.end_time,
                reason: args.reason,
                attachment: args.attachment,
            })
            .await
            .map_err(workflow_failure)
    });

    match result {
        Ok(request) => {
            let message = match (&request.current_approver_id, request.approval_level) {
                (Some(approver), Some(level)) => format!(
                    "filed absence request {} ({} days); awaiting {} as {level}",
                    request.id.0, request.total_days, approver.0
                ),
                _ => format!(
                    "filed absence request {} ({} days); approved without review",
                    request.id.0, request.total_days
                ),
            };
            CommandResult::success_with_data("request.file", message, to_data(&request))
        }
        Err(failure) => failure,
    }
}

/// Approve or reject on behalf of `user`, who must be the current approver.
pub fn decide(
    request_id: &str,
    user: &str,
    decision: ApprovalDecision,
    comment: Option<String>,
) -> CommandResult {
    let command = match decision {
        ApprovalDecision::Approved => "request.approve",
        ApprovalDecision::Rejected => "request.reject",
    };
    let request_id = AbsenceRequestId(request_id.to_owned());
    let actor = UserId(user.to_owned());

    let result = with_database(command, |pool| async move {
        let engine = sql_workflow_engine(&pool);
        let request = engine
            .store()
            .find_request(&request_id)
            .await
            .map_err(|error| ("persistence", error.to_string(), 4u8))?
            .ok_or_else(|| not_found(&request_id))?;
        ensure_current_approver(&request, &actor).map_err(workflow_failure)?;

        engine.process_approval(&request_id, &actor, decision, comment).await.map_err(workflow_failure)
    });

    match result {
        Ok(outcome) => {
            let message = match &outcome.next_approver {
                Some(next) => format!(
                    "recorded {} at {}; forwarded to {} as {}",
                    outcome.history.action.as_str(),
                    outcome.history.level,
                    next.user_id.0,
                    next.level
                ),
                None => format!(
                    "recorded {} at {}; request is now {}",
                    outcome.history.action.as_str(),
                    outcome.history.level,
                    outcome.request.status.as_str()
                ),
            };
            CommandResult::success_with_data(command, message, to_data(&outcome))
        }
        Err(failure) => failure,
    }
}

pub fn cancel(request_id: &str, user: &str) -> CommandResult {
    let request_id = AbsenceRequestId(request_id.to_owned());
    let actor = UserId(user.to_owned());

    let result = with_database("request.cancel", |pool| async move {
        sql_workflow_engine(&pool).cancel_absence_request(&request_id, &actor).await.map_err(workflow_failure)
    });

    match result {
        Ok(request) => CommandResult::success_with_data(
            "request.cancel",
            format!("cancelled absence request {}", request.id.0),
            to_data(&request),
        ),
        Err(failure) => failure,
    }
}

pub fn show(request_id: &str) -> CommandResult {
    let request_id = AbsenceRequestId(request_id.to_owned());

    let result = with_database("request.show", |pool| async move {
        let repository = SqlAbsenceRequestRepository::new(pool);
        let request = repository
            .find_by_id(&request_id)
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| not_found(&request_id))?;
        let history = repository.history(&request_id).await.map_err(repository_failure)?;
        Ok((request, history))
    });

    match result {
        Ok((request, history)) => CommandResult::success_with_data(
            "request.show",
            format!(
                "absence request {} is {} with {} decisions recorded",
                request.id.0,
                request.status.as_str(),
                history.len()
            ),
            Some(json!({ "request": request, "history": history })),
        ),
        Err(failure) => failure,
    }
}

/// Every request `user` has filed, newest first.
pub fn list(user: &str) -> CommandResult {
    let requester = UserId(user.to_owned());

    let result = with_database("request.list", |pool| async move {
        SqlAbsenceRequestRepository::new(pool)
            .list_for_requester(&requester)
            .await
            .map_err(repository_failure)
    });

    match result {
        Ok(requests) => {
            let pending = requests.iter().filter(|request| request.is_pending()).count();
            CommandResult::success_with_data(
                "request.list",
                format!("{} requests filed by {user}, {pending} pending", requests.len()),
                to_data(&requests),
            )
        }
        Err(failure) => failure,
    }
}

/// Pending requests waiting on `user`, oldest first.
pub fn inbox(user: &str) -> CommandResult {
    let approver = UserId(user.to_owned());

    let result = with_database("request.inbox", |pool| async move {
        SqlAbsenceRequestRepository::new(pool).list_awaiting(&approver).await.map_err(repository_failure)
    });

    match result {
        Ok(requests) => CommandResult::success_with_data(
            "request.inbox",
            format!("{} requests awaiting {user}", requests.len()),
            to_data(&requests),
        ),
        Err(failure) => failure,
    }
}

async fn resolve_absence_type(pool: &DbPool, code_or_id: &str) -> Result<AbsenceTypeId, Failure> {
    let repository = SqlAbsenceTypeRepository::new(pool.clone());
    if let Some(found) = repository.find_by_code(code_or_id).await.map_err(repository_failure)? {
        return Ok(found.id);
    }
    repository
        .find_by_id(&AbsenceTypeId(code_or_id.to_owned()))
        .await
        .map_err(repository_failure)?
        .map(|found| found.id)
        .ok_or_else(|| ("not_found", format!("absence type `{code_or_id}` was not found"), 6u8))
}

fn not_found(request_id: &AbsenceRequestId) -> Failure {
    ("not_found", format!("absence request `{}` was not found", request_id.0), 6)
}
