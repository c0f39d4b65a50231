//! Loan risk engine: underwriting score, pricing and amortization.
//!
//! Scoring starts from the configured base and is adjusted by:
//!   - debt-to-income against declared monthly income
//!   - age of the customer relationship
//!   - the customer's AML risk level
//!   - liquidity held across all accounts
//!
//! The result is informational. Every application still goes to a
//! reviewer, who approves or rejects it exactly once.

use crate::{
    config::LoanConfig,
    engine::LedgerEngine,
    error::{LedgerError, LedgerResult},
    event::{AuditSeverity, NotificationKind},
    model::{EmiInstallment, LoanRecord, LoanStatus, LoanType, RiskLevel, RiskProfile},
    requests::LoanApplication,
    store::StoreTx,
    types::{new_id, round_money, Money},
};
use log::info;
use rust_decimal::{Decimal, MathematicalOps};
use serde_json::json;

// ── Constants ─────────────────────────────────────────────────────

/// Below this score the max loan limit drops to `SUBPRIME_LIMIT_FACTOR`.
const SUBPRIME_SCORE: i32 = 600;
const SUBPRIME_LIMIT_FACTOR: Decimal = Decimal::from_parts(2, 0, 0, false, 1); // 0.2
/// The new loan's EMI is estimated as principal / tenure plus this margin.
const EMI_ESTIMATE_FACTOR: Decimal = Decimal::from_parts(105, 0, 0, false, 2); // 1.05
/// Liquidity bonus applies when balances exceed this share of the principal.
const LIQUIDITY_SHARE: Decimal = Decimal::from_parts(2, 0, 0, false, 1); // 0.2

const DTI_BANDS: [(i64, i32); 2] = [(30, 100), (50, 50)];
const DTI_PENALTY_ABOVE: i64 = 70;
const DTI_PENALTY: i32 = -100;
const ACCOUNT_AGE_BONUSES: [(i64, i32); 2] = [(365, 50), (1000, 50)];
const LIQUIDITY_BONUS: i32 = 50;
const AML_HIGH_PENALTY: i32 = -200;
const AML_MEDIUM_PENALTY: i32 = -50;

/// (minimum score, approval probability %), best band first.
const APPROVAL_BANDS: [(i32, u8); 3] = [(750, 95), (650, 75), (550, 40)];
const APPROVAL_FLOOR: u8 = 10;
const ELIGIBLE_PROBABILITY: u8 = 50;

/// (minimum score, annual rate in tenths of a percent), best band first.
const RATE_BANDS: [(i32, i64); 3] = [(800, 75), (700, 90), (600, 145)];
const RATE_FLOOR_BAND: i64 = 120;

// ── Scoring ───────────────────────────────────────────────────────

/// Everything the score depends on, gathered from the store.
#[derive(Debug, Clone)]
pub struct RiskInputs {
    pub principal:           Money,
    pub tenure_months:       u32,
    pub monthly_income:      Money,
    pub loan_type:           LoanType,
    /// EMIs of the applicant's loans that still carry a balance.
    pub existing_emi_total:  Money,
    pub account_age_days:    i64,
    pub aml_risk_level:      RiskLevel,
    pub total_balance:       Money,
}

/// Debt-to-income in percent including an estimate for the new loan.
pub fn debt_to_income(inputs: &RiskInputs) -> LedgerResult<Money> {
    inputs
        .principal
        .checked_div(Decimal::from(inputs.tenure_months))
        .and_then(|v| v.checked_mul(EMI_ESTIMATE_FACTOR))
        .and_then(|estimate| inputs.existing_emi_total.checked_add(estimate))
        .and_then(|debt| debt.checked_div(inputs.monthly_income))
        .and_then(|ratio| ratio.checked_mul(Decimal::from(100)))
        .ok_or_else(overflow)
}

pub fn credit_score(config: &LoanConfig, inputs: &RiskInputs) -> LedgerResult<i32> {
    let mut score = config.base_score;

    let dti = debt_to_income(inputs)?;
    if let Some((_, bonus)) = DTI_BANDS.iter().find(|(below, _)| dti < Decimal::from(*below)) {
        score += bonus;
    } else if dti > Decimal::from(DTI_PENALTY_ABOVE) {
        score += DTI_PENALTY;
    }

    for (days, bonus) in ACCOUNT_AGE_BONUSES {
        if inputs.account_age_days > days {
            score += bonus;
        }
    }

    score += match inputs.aml_risk_level {
        RiskLevel::High   => AML_HIGH_PENALTY,
        RiskLevel::Medium => AML_MEDIUM_PENALTY,
        RiskLevel::Low    => 0,
    };

    if inputs.total_balance > inputs.principal * LIQUIDITY_SHARE {
        score += LIQUIDITY_BONUS;
    }

    Ok(score.clamp(config.min_score, config.max_score))
}

pub fn approval_probability(score: i32) -> u8 {
    APPROVAL_BANDS
        .iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, p)| *p)
        .unwrap_or(APPROVAL_FLOOR)
}

pub fn max_loan_limit(config: &LoanConfig, score: i32, monthly_income: Money) -> Money {
    // Past the decimal range the cap applies anyway.
    let mut limit = monthly_income
        .checked_mul(config.income_multiplier)
        .unwrap_or(config.absolute_loan_cap);
    if score < SUBPRIME_SCORE {
        limit *= SUBPRIME_LIMIT_FACTOR;
    }
    round_money(limit.min(config.absolute_loan_cap))
}

/// Annual rate in percent for `score`, after any loan-type discount.
pub fn interest_rate(config: &LoanConfig, score: i32, loan_type: LoanType) -> Money {
    let tenths = RATE_BANDS
        .iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, r)| *r)
        .unwrap_or(RATE_FLOOR_BAND);
    let rate = Decimal::new(tenths, 1);
    if loan_type == LoanType::Home {
        (rate - config.home_loan_discount).max(config.minimum_rate)
    } else {
        rate
    }
}

pub fn assess(config: &LoanConfig, inputs: &RiskInputs) -> LedgerResult<RiskProfile> {
    let score = credit_score(config, inputs)?;
    let probability = approval_probability(score);
    let limit = max_loan_limit(config, score, inputs.monthly_income);
    Ok(RiskProfile {
        risk_score:             score,
        approval_probability:   probability,
        max_loan_limit:         limit,
        assigned_interest_rate: interest_rate(config, score, inputs.loan_type),
        eligible:               probability >= ELIGIBLE_PROBABILITY && inputs.principal <= limit,
    })
}

// ── Amortization ──────────────────────────────────────────────────

fn overflow() -> LedgerError {
    LedgerError::InvalidRequest("loan terms overflow decimal precision".into())
}

/// Fixed monthly installment, rounded to cents.
pub fn monthly_emi(principal: Money, annual_rate: Money, tenure_months: u32) -> LedgerResult<Money> {
    if tenure_months == 0 {
        return Err(LedgerError::InvalidRequest("tenure_months must be at least 1".into()));
    }
    let n = Decimal::from(tenure_months);
    let r = annual_rate / Decimal::from(1200);
    if r <= Decimal::ZERO {
        return Ok(round_money(principal / n));
    }
    let growth = (Decimal::ONE + r).checked_powu(tenure_months as u64).ok_or_else(overflow)?;
    let emi = principal
        .checked_mul(r)
        .and_then(|v| v.checked_mul(growth))
        .and_then(|v| v.checked_div(growth - Decimal::ONE))
        .ok_or_else(overflow)?;
    Ok(round_money(emi))
}

/// Reducing-balance schedule. The last month's principal is whatever is
/// left, so the principal column sums to `principal` exactly and the
/// final remaining balance is zero.
pub fn generate_emi_schedule(
    principal: Money,
    annual_rate: Money,
    tenure_months: u32,
) -> LedgerResult<Vec<EmiInstallment>> {
    let emi = monthly_emi(principal, annual_rate, tenure_months)?;
    let r = annual_rate.max(Decimal::ZERO) / Decimal::from(1200);

    let mut balance = principal;
    let mut schedule = Vec::with_capacity(tenure_months as usize);
    for month in 1..=tenure_months {
        let interest = round_money(balance * r);
        let principal_component = if month == tenure_months {
            balance
        } else {
            (emi - interest).clamp(Decimal::ZERO, balance)
        };
        balance -= principal_component;
        schedule.push(EmiInstallment {
            month,
            principal_component,
            interest_component: interest,
            remaining_balance: balance,
        });
    }
    Ok(schedule)
}

// ── Engine operations ─────────────────────────────────────────────

impl LedgerEngine {
    fn risk_inputs(&self, tx: &StoreTx<'_>, app: &LoanApplication) -> LedgerResult<RiskInputs> {
        let user = tx
            .user(&app.owner_id)?
            .ok_or_else(|| LedgerError::UserNotFound { user_id: app.owner_id.clone() })?;
        Ok(RiskInputs {
            principal:          app.principal,
            tenure_months:      app.tenure_months,
            monthly_income:     app.declared_monthly_income,
            loan_type:          app.loan_type,
            existing_emi_total: tx.outstanding_emis(&user.user_id)?.into_iter().sum(),
            account_age_days:   (self.clock.now() - user.created_at).num_days(),
            aml_risk_level:     user.risk_level,
            total_balance:      tx.owner_total_balance(&user.user_id)?,
        })
    }

    /// Score an application without recording anything.
    pub fn evaluate_risk(&self, app: &LoanApplication) -> LedgerResult<RiskProfile> {
        app.validate()?;
        let inputs = self.store.read(|tx| self.risk_inputs(tx, app))?;
        assess(&self.config.loans, &inputs)
    }

    /// Score, price and schedule an application, then store it as pending.
    pub fn apply_for_loan(&self, app: &LoanApplication) -> LedgerResult<LoanRecord> {
        app.validate()?;
        let now = self.clock.now();
        let loan = self.commit(|tx, fx| {
            let inputs = self.risk_inputs(tx, app)?;
            let profile = assess(&self.config.loans, &inputs)?;
            let rate = profile.assigned_interest_rate;
            let loan = LoanRecord {
                loan_id:           new_id(),
                owner_id:          app.owner_id.clone(),
                loan_type:         app.loan_type,
                principal:         app.principal,
                tenure_months:     app.tenure_months,
                interest_rate:     rate,
                emi:               monthly_emi(app.principal, rate, app.tenure_months)?,
                remaining_balance: app.principal,
                status:            LoanStatus::Pending,
                emi_schedule:      generate_emi_schedule(app.principal, rate, app.tenure_months)?,
                risk_profile:      profile,
                created_at:        now,
                reviewed_by:       None,
                reviewed_at:       None,
            };
            tx.insert_loan(&loan)?;
            fx.audit(
                &app.owner_id,
                "loan_applied",
                "loan",
                &loan.loan_id,
                None,
                Some(json!({
                    "principal": loan.principal,
                    "tenure_months": loan.tenure_months,
                    "risk_profile": loan.risk_profile,
                })),
                AuditSeverity::Info,
            );
            fx.notify(
                &app.owner_id,
                NotificationKind::LoanUpdate,
                format!(
                    "Your {} loan application for {} is under review.",
                    loan.loan_type, loan.principal
                ),
            );
            Ok(loan)
        })?;
        info!(
            "loan {} applied: score {} probability {}% rate {}",
            loan.loan_id,
            loan.risk_profile.risk_score,
            loan.risk_profile.approval_probability,
            loan.interest_rate
        );
        Ok(loan)
    }

    /// One-time reviewer decision on a pending loan.
    pub fn review_loan(
        &self,
        reviewer_id: &str,
        loan_id: &str,
        approve: bool,
    ) -> LedgerResult<LoanRecord> {
        let status = if approve { LoanStatus::Approved } else { LoanStatus::Rejected };
        let now = self.clock.now();
        let loan = self.commit(|tx, fx| {
            let loan = tx
                .loan(loan_id)?
                .ok_or_else(|| LedgerError::LoanNotFound { loan_id: loan_id.to_string() })?;
            if loan.status != LoanStatus::Pending {
                return Err(LedgerError::AlreadyReviewed {
                    id:     loan_id.to_string(),
                    status: loan.status.to_string(),
                });
            }
            tx.set_loan_review(loan_id, status, reviewer_id, now)?;
            fx.audit(
                reviewer_id,
                "loan_reviewed",
                "loan",
                loan_id,
                Some(json!({ "status": loan.status })),
                Some(json!({ "status": status })),
                AuditSeverity::Warning,
            );
            fx.notify(
                &loan.owner_id,
                NotificationKind::LoanUpdate,
                format!("Your loan {loan_id} was {status}."),
            );
            tx.loan(loan_id)?
                .ok_or_else(|| LedgerError::LoanNotFound { loan_id: loan_id.to_string() })
        })?;
        info!("loan {loan_id} {status} by {reviewer_id}");
        Ok(loan)
    }

    pub fn loan(&self, loan_id: &str) -> LedgerResult<LoanRecord> {
        self.store
            .read(|tx| tx.loan(loan_id))?
            .ok_or_else(|| LedgerError::LoanNotFound { loan_id: loan_id.to_string() })
    }

    pub fn loans_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<LoanRecord>> {
        self.store.read(|tx| tx.loans_for_owner(owner_id))
    }
}
