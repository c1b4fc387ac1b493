//! Audit log CLI commands

use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;

use crate::audit::{AuditFilter, SortOrder};
use crate::context::AuditContext;
use crate::display::{format_history_table, format_record_details};
use crate::error::{AuditError, AuditResult};
use crate::models::{AuditAction, EntityType};

/// Arguments for `rollcall history`
#[derive(Args)]
pub struct HistoryArgs {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Maximum number of records to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
    /// Show every field change of every record
    #[arg(short, long)]
    pub verbose: bool,
    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `rollcall logs`
#[derive(Args)]
pub struct LogsArgs {
    /// Filter by entity type
    #[arg(long = "type")]
    pub entity_type: Option<EntityType>,
    /// Filter by entity id
    #[arg(long = "id")]
    pub entity_id: Option<String>,
    /// Filter by action
    #[arg(short, long)]
    pub action: Option<AuditAction>,
    /// Filter by actor id
    #[arg(long)]
    pub actor: Option<String>,
    /// Records on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,
    /// Records before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
    /// Tag substring, case-insensitive
    #[arg(short, long)]
    pub tag: Option<String>,
    #[arg(short, long, default_value = "50")]
    pub limit: usize,
    /// Oldest records first
    #[arg(long)]
    pub oldest_first: bool,
    #[arg(long)]
    pub json: bool,
}

impl LogsArgs {
    fn filter(&self) -> AuditResult<AuditFilter> {
        let mut filter = AuditFilter::new();
        if let Some(entity_type) = self.entity_type {
            filter = filter.entity_type(entity_type);
        }
        if let Some(entity_id) = &self.entity_id {
            filter = filter.entity_id(entity_id.clone());
        }
        if let Some(action) = self.action {
            filter = filter.action(action);
        }
        if let Some(actor) = &self.actor {
            filter = filter.actor_id(actor.clone());
        }
        if let Some(since) = &self.since {
            filter = filter.since(parse_date(since)?);
        }
        if let Some(until) = &self.until {
            filter = filter.until(parse_date(until)?);
        }
        if let Some(tag) = &self.tag {
            filter = filter.tag(tag.clone());
        }
        if self.oldest_first {
            filter = filter.order(SortOrder::OldestFirst);
        }
        Ok(filter)
    }
}

/// Parse `YYYY-MM-DD` as midnight UTC
pub fn parse_date(s: &str) -> AuditResult<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AuditError::Validation(format!("Invalid date '{}': expected YYYY-MM-DD", s)))
}

pub fn handle_history_command(ctx: &AuditContext, args: HistoryArgs) -> AuditResult<()> {
    let records = ctx.get_audit_history(args.entity_type, &args.entity_id, Some(args.limit))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("History: {} {}", args.entity_type, args.entity_id);
    println!();
    if args.verbose {
        if records.is_empty() {
            println!("No audit records found.");
        }
        for record in &records {
            println!("{}", format_record_details(record));
        }
    } else {
        print!("{}", format_history_table(&records));
    }
    Ok(())
}

pub fn handle_logs_command(ctx: &AuditContext, args: LogsArgs) -> AuditResult<()> {
    let filter = args.filter()?;
    let records = ctx.get_all_audit_logs(&filter, Some(args.limit))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", format_history_table(&records));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_date() {
        let dt = parse_date("2024-03-15").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 3, 15));
        assert_eq!(dt.hour(), 0);

        assert!(parse_date("15/03/2024").unwrap_err().is_validation());
    }
}
