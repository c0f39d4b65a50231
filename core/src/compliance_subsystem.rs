//! Compliance / AML screen.
//!
//! Every outbound transfer is screened before the ledger scope opens:
//!   1. Sanctions match    (critical, blocks the transfer, freezes the user)
//!   2. Large transaction  (high)
//!   3. Structuring        (medium, just under the large threshold)
//!   4. Velocity           (high, too many outbound rows in the trailing window)
//!   5. High-risk country  (high, external transfers only)
//!
//! Screening commits in its own scope, so suspicious activity rows,
//! risk score bumps and freezes persist even when the transfer they
//! were raised for is rejected. The automated path never lowers a
//! user's risk score.

use crate::{
    config::{ComplianceConfig, SanctionSeed},
    engine::{LedgerEngine, SYSTEM_ACTOR},
    error::{LedgerError, LedgerResult},
    event::{AuditSeverity, NotificationKind},
    model::{
        ComplianceRule, ReviewStatus, RiskLevel, SanctionEntry, Severity,
        SuspiciousActivityRecord, TransactionRecord, UserAccountStatus,
    },
    types::{new_id, EntityId, Money},
};
use chrono::Duration;
use log::{info, warn};
use serde_json::json;

// ── Rule evaluation ───────────────────────────────────────────────

/// What a transfer looks like to the screen.
#[derive(Debug, Clone)]
pub struct ScreeningRequest<'a> {
    pub user_id:           &'a str,
    pub amount:            Money,
    /// Name the sanctions list is searched for. None skips the search.
    pub counterparty_name: Option<&'a str>,
    /// Receiving bank country for external transfers.
    pub country:           Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleHit {
    pub rule:     ComplianceRule,
    pub severity: Severity,
    pub metadata: serde_json::Value,
}

/// Apply every rule independently. Several may fire for one transfer.
pub fn evaluate_rules(
    config: &ComplianceConfig,
    amount: Money,
    recent_transactions: i64,
    sanction_matches: &[SanctionEntry],
    counterparty_name: Option<&str>,
    country: Option<&str>,
) -> Vec<RuleHit> {
    let mut hits = Vec::new();

    if !sanction_matches.is_empty() {
        let matched: Vec<_> = sanction_matches
            .iter()
            .map(|e| json!({ "name": e.name, "program": e.program, "country": e.country }))
            .collect();
        hits.push(RuleHit {
            rule:     ComplianceRule::SanctionMatch,
            severity: Severity::Critical,
            metadata: json!({ "counterparty": counterparty_name, "matches": matched }),
        });
    }

    if amount >= config.large_transaction_threshold {
        hits.push(RuleHit {
            rule:     ComplianceRule::LargeTransaction,
            severity: Severity::High,
            metadata: json!({ "amount": amount, "threshold": config.large_transaction_threshold }),
        });
    } else if amount >= config.structuring_floor {
        hits.push(RuleHit {
            rule:     ComplianceRule::Structuring,
            severity: Severity::Medium,
            metadata: json!({
                "amount": amount,
                "floor": config.structuring_floor,
                "threshold": config.large_transaction_threshold,
            }),
        });
    }

    if recent_transactions >= config.velocity_max_transactions {
        hits.push(RuleHit {
            rule:     ComplianceRule::VelocityCheck,
            severity: Severity::High,
            metadata: json!({
                "recent_transactions": recent_transactions,
                "window_minutes": config.velocity_window_minutes,
            }),
        });
    }

    if let Some(code) = country {
        if config.high_risk_countries.iter().any(|c| c.eq_ignore_ascii_case(code)) {
            hits.push(RuleHit {
                rule:     ComplianceRule::HighRiskCountry,
                severity: Severity::High,
                metadata: json!({ "country": code.to_ascii_uppercase() }),
            });
        }
    }

    hits
}

/// New risk score after `hits`. Never below `current`, never above 100.
pub fn bumped_risk_score(current: u8, hits: &[RuleHit], is_pep: bool, pep_bonus: u8) -> u8 {
    if hits.is_empty() {
        return current;
    }
    let mut points: u32 = hits.iter().map(|h| h.severity.risk_points() as u32).sum();
    if is_pep {
        points += pep_bonus as u32;
    }
    (current as u32 + points).min(100) as u8
}

/// Outcome of screening one transfer.
#[derive(Debug, Clone)]
pub struct ScreeningOutcome {
    pub hits:         Vec<RuleHit>,
    pub activity_ids: Vec<EntityId>,
    pub risk_score:   u8,
    pub risk_level:   RiskLevel,
    /// Set when the transfer must not proceed.
    pub blocked:      Option<String>,
}

impl ScreeningOutcome {
    pub fn is_flagged(&self) -> bool {
        !self.hits.is_empty()
    }

    /// Risk carried on the ledger row: the points of the rules that fired.
    pub fn transaction_risk(&self) -> u8 {
        self.hits
            .iter()
            .map(|h| h.severity.risk_points() as u32)
            .sum::<u32>()
            .min(100) as u8
    }

    /// Stamp a ledger row with the screening verdict.
    pub fn mark(&self, row: &mut TransactionRecord) {
        row.is_flagged = self.is_flagged();
        row.risk_score = self.transaction_risk();
    }

    pub fn into_result(self) -> LedgerResult<Self> {
        match &self.blocked {
            Some(reason) => Err(LedgerError::ComplianceBlocked { reason: reason.clone() }),
            None => Ok(self),
        }
    }
}

// ── Screening and review ──────────────────────────────────────────

impl LedgerEngine {
    /// Screen a transfer and persist its compliance trail.
    ///
    /// Returns `ComplianceBlocked` after committing when the transfer
    /// must be rejected; the caller then never opens its ledger scope.
    pub fn screen_transfer(&self, req: &ScreeningRequest<'_>) -> LedgerResult<ScreeningOutcome> {
        let config = &self.config.compliance;
        let matches = match req.counterparty_name {
            Some(name) => self.sanctions.find_by_name(name)?,
            None => Vec::new(),
        };
        let now = self.clock.now();
        let since = now - Duration::minutes(config.velocity_window_minutes);

        let outcome = self.commit(|tx, fx| {
            let user = tx
                .user(req.user_id)?
                .ok_or_else(|| LedgerError::UserNotFound { user_id: req.user_id.to_string() })?;
            let recent = tx.count_outbound_since(req.user_id, since)?;
            let hits = evaluate_rules(
                config,
                req.amount,
                recent,
                &matches,
                req.counterparty_name,
                req.country,
            );

            let mut activity_ids = Vec::with_capacity(hits.len());
            for hit in &hits {
                let sa = SuspiciousActivityRecord {
                    activity_id:    new_id(),
                    user_id:        user.user_id.clone(),
                    transaction_id: None,
                    rule:           hit.rule,
                    severity:       hit.severity,
                    status:         ReviewStatus::PendingReview,
                    metadata:       hit.metadata.clone(),
                    remarks:        None,
                    created_at:     now,
                };
                tx.insert_suspicious_activity(&sa)?;
                activity_ids.push(sa.activity_id);
            }

            let score = bumped_risk_score(user.risk_score, &hits, user.is_pep, config.pep_risk_bonus);
            let level = RiskLevel::from_score(score);
            if score != user.risk_score {
                tx.update_user_risk(&user.user_id, score, level)?;
                fx.audit(
                    SYSTEM_ACTOR,
                    "risk_score_updated",
                    "user",
                    &user.user_id,
                    Some(json!({ "risk_score": user.risk_score, "risk_level": user.risk_level })),
                    Some(json!({ "risk_score": score, "risk_level": level })),
                    AuditSeverity::Warning,
                );
            }

            let sanctioned = hits.iter().any(|h| h.rule == ComplianceRule::SanctionMatch);
            let blocked = if sanctioned {
                let frozen = tx.freeze_owner_accounts(&user.user_id)?;
                tx.set_user_account_status(&user.user_id, UserAccountStatus::Frozen)?;
                fx.audit(
                    SYSTEM_ACTOR,
                    "accounts_frozen",
                    "user",
                    &user.user_id,
                    Some(json!({ "account_status": user.account_status })),
                    Some(json!({ "account_status": UserAccountStatus::Frozen, "accounts": frozen })),
                    AuditSeverity::Destructive,
                );
                fx.notify(
                    &user.user_id,
                    NotificationKind::AccountFrozen,
                    "Your accounts have been frozen pending a compliance review.".into(),
                );
                Some("counterparty matches the sanctions list".to_string())
            } else if user.risk_level == RiskLevel::High {
                Some("user risk level is high".to_string())
            } else {
                None
            };

            if !hits.is_empty() {
                fx.notify(
                    &user.user_id,
                    NotificationKind::ComplianceAlert,
                    format!("A transfer of {} was flagged for compliance review.", req.amount),
                );
            }

            Ok(ScreeningOutcome { hits, activity_ids, risk_score: score, risk_level: level, blocked })
        })?;

        if let Some(reason) = &outcome.blocked {
            warn!("blocked transfer by {}: {reason}", req.user_id);
        } else if outcome.is_flagged() {
            let rules: Vec<_> = outcome.hits.iter().map(|h| h.rule.as_str()).collect();
            warn!("flagged transfer by {} ({})", req.user_id, rules.join(", "));
        }
        outcome.into_result()
    }

    /// Manual review of a suspicious activity row.
    ///
    /// Only `pending_review` rows can be reviewed. `blocked` also blocks
    /// the user and freezes all of their accounts.
    pub fn review_suspicious_activity(
        &self,
        reviewer_id: &str,
        activity_id: &str,
        status: ReviewStatus,
        remarks: &str,
    ) -> LedgerResult<SuspiciousActivityRecord> {
        if status == ReviewStatus::PendingReview {
            return Err(LedgerError::InvalidTransition(
                "review must approve, reject or block".into(),
            ));
        }
        let reviewed = self.commit(|tx, fx| {
            let sa = tx
                .suspicious_activity(activity_id)?
                .ok_or_else(|| LedgerError::RecordNotFound { id: activity_id.to_string() })?;
            if sa.status != ReviewStatus::PendingReview {
                return Err(LedgerError::AlreadyReviewed {
                    id:     activity_id.to_string(),
                    status: sa.status.to_string(),
                });
            }
            tx.review_suspicious_activity(activity_id, status, remarks)?;
            fx.audit(
                reviewer_id,
                "suspicious_activity_reviewed",
                "suspicious_activity",
                activity_id,
                Some(json!({ "status": sa.status })),
                Some(json!({ "status": status, "remarks": remarks })),
                AuditSeverity::Info,
            );

            if status == ReviewStatus::Blocked {
                let frozen = tx.freeze_owner_accounts(&sa.user_id)?;
                tx.set_user_account_status(&sa.user_id, UserAccountStatus::Blocked)?;
                fx.audit(
                    reviewer_id,
                    "user_blocked",
                    "user",
                    &sa.user_id,
                    None,
                    Some(json!({ "account_status": UserAccountStatus::Blocked, "accounts": frozen })),
                    AuditSeverity::Destructive,
                );
                fx.notify(
                    &sa.user_id,
                    NotificationKind::AccountFrozen,
                    "Your accounts have been blocked following a compliance review.".into(),
                );
            }

            tx.suspicious_activity(activity_id)?
                .ok_or_else(|| LedgerError::RecordNotFound { id: activity_id.to_string() })
        })?;
        info!("suspicious activity {activity_id} reviewed as {status} by {reviewer_id}");
        Ok(reviewed)
    }

    /// Reviewer override of a ledger row's flag and risk score.
    pub fn update_transaction_flag(
        &self,
        reviewer_id: &str,
        transaction_id: &str,
        is_flagged: bool,
        risk_score: u8,
    ) -> LedgerResult<TransactionRecord> {
        let risk_score = risk_score.min(100);
        self.commit(|tx, fx| {
            let before = tx
                .transaction(transaction_id)?
                .ok_or_else(|| LedgerError::RecordNotFound { id: transaction_id.to_string() })?;
            tx.set_transaction_flag(transaction_id, is_flagged, risk_score)?;
            fx.audit(
                reviewer_id,
                "transaction_flag_updated",
                "transaction",
                transaction_id,
                Some(json!({ "is_flagged": before.is_flagged, "risk_score": before.risk_score })),
                Some(json!({ "is_flagged": is_flagged, "risk_score": risk_score })),
                AuditSeverity::Info,
            );
            tx.transaction(transaction_id)?
                .ok_or_else(|| LedgerError::RecordNotFound { id: transaction_id.to_string() })
        })
    }

    /// Load sanctions entries. Re-seeding the same names replaces them.
    pub fn seed_sanctions(&self, seeds: &[SanctionSeed]) -> LedgerResult<usize> {
        let count = self.commit(|tx, _| {
            for seed in seeds {
                let entry = SanctionEntry {
                    entry_id: sanction_entry_id(&seed.name),
                    name:     seed.name.clone(),
                    program:  seed.program.clone(),
                    country:  seed.country.clone(),
                };
                tx.insert_sanction(&entry)?;
            }
            tx.sanction_count()
        })?;
        info!("sanctions list holds {count} entries");
        Ok(count as usize)
    }

    pub fn suspicious_activities_for_user(
        &self,
        user_id: &str,
    ) -> LedgerResult<Vec<SuspiciousActivityRecord>> {
        self.store.read(|tx| tx.suspicious_activities_for_user(user_id))
    }

    pub fn suspicious_activities_by_status(
        &self,
        status: ReviewStatus,
    ) -> LedgerResult<Vec<SuspiciousActivityRecord>> {
        self.store.read(|tx| tx.suspicious_activities_by_status(status))
    }
}

fn sanction_entry_id(name: &str) -> String {
    let slug: Vec<_> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!("sdn-{}", slug.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(name: &str) -> SanctionEntry {
        SanctionEntry {
            entry_id: sanction_entry_id(name),
            name:     name.into(),
            program:  "SDN".into(),
            country:  None,
        }
    }

    fn rules(hits: &[RuleHit]) -> Vec<ComplianceRule> {
        hits.iter().map(|h| h.rule).collect()
    }

    #[test]
    fn structuring_band_is_half_open() {
        let config = ComplianceConfig::default();
        let at_floor = evaluate_rules(&config, dec!(9000), 0, &[], None, None);
        assert_eq!(rules(&at_floor), vec![ComplianceRule::Structuring]);

        let at_threshold = evaluate_rules(&config, dec!(10000), 0, &[], None, None);
        assert_eq!(rules(&at_threshold), vec![ComplianceRule::LargeTransaction]);

        let below = evaluate_rules(&config, dec!(8999.99), 0, &[], None, None);
        assert!(below.is_empty());
    }

    #[test]
    fn rules_fire_independently() {
        let config = ComplianceConfig::default();
        let hits = evaluate_rules(
            &config,
            dec!(25000),
            5,
            &[entry("Ivan Petrov")],
            Some("ivan petrov"),
            Some("kp"),
        );
        assert_eq!(
            rules(&hits),
            vec![
                ComplianceRule::SanctionMatch,
                ComplianceRule::LargeTransaction,
                ComplianceRule::VelocityCheck,
                ComplianceRule::HighRiskCountry,
            ]
        );
        assert_eq!(hits[0].severity, Severity::Critical);
    }

    #[test]
    fn velocity_fires_at_configured_count() {
        let config = ComplianceConfig::default();
        assert!(evaluate_rules(&config, dec!(100), 4, &[], None, None).is_empty());
        let hits = evaluate_rules(&config, dec!(100), 5, &[], None, None);
        assert_eq!(rules(&hits), vec![ComplianceRule::VelocityCheck]);
    }

    #[test]
    fn risk_bump_adds_points_and_pep_bonus_then_clamps() {
        let hit = |severity| RuleHit { rule: ComplianceRule::Structuring, severity, metadata: json!({}) };
        assert_eq!(bumped_risk_score(0, &[hit(Severity::Medium)], false, 10), 10);
        assert_eq!(bumped_risk_score(0, &[hit(Severity::Medium)], true, 10), 20);
        assert_eq!(bumped_risk_score(90, &[hit(Severity::Critical)], false, 10), 100);
        assert_eq!(bumped_risk_score(30, &[], true, 10), 30);
    }

    #[test]
    fn entry_ids_are_stable_slugs() {
        assert_eq!(sanction_entry_id("Ivan  Petrov-Ltd."), "sdn-ivan-petrov-ltd");
    }
}
