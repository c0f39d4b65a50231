use crate::types::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Amounts at or above this are `large_transaction`.
    pub large_transaction_threshold: Money,
    /// Amounts in [structuring_floor, large_transaction_threshold) are `structuring`.
    pub structuring_floor:           Money,
    pub velocity_max_transactions:   i64,
    pub velocity_window_minutes:     i64,
    pub pep_risk_bonus:              u8,
    /// ISO country codes that raise `high_risk_country` on external transfers.
    #[serde(default)]
    pub high_risk_countries:         Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            large_transaction_threshold: Decimal::from(10_000),
            structuring_floor:           Decimal::from(9_000),
            velocity_max_transactions:   5,
            velocity_window_minutes:     60,
            pep_risk_bonus:              10,
            high_risk_countries:         vec!["KP".into(), "IR".into(), "MM".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    pub default_daily_limit:         Money,
    pub default_currency:            String,
    /// Settlement latency simulated for external bank transfers.
    pub external_settlement_minutes: i64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default_daily_limit:         Decimal::from(50_000),
            default_currency:            "INR".into(),
            external_settlement_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanConfig {
    pub base_score:         i32,
    pub min_score:          i32,
    pub max_score:          i32,
    pub income_multiplier:  Money,
    pub absolute_loan_cap:  Money,
    pub home_loan_discount: Money,
    pub minimum_rate:       Money,
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            base_score:         600,
            min_score:          300,
            max_score:          850,
            income_multiplier:  Decimal::from(50),
            absolute_loan_cap:  Decimal::from(10_000_000),
            home_loan_discount: Decimal::new(15, 1),
            minimum_rate:       Decimal::from(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub interval_secs: u64,
    /// Capacity of the queue between the timer and the settlement worker.
    pub queue_depth:   usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { interval_secs: 60, queue_depth: 256 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(default)]
    pub limits:     LimitConfig,
    #[serde(default)]
    pub loans:      LoanConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct SanctionsFile {
    entries: Vec<SanctionSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanctionSeed {
    pub name:    String,
    pub program: String,
    #[serde(default)]
    pub country: Option<String>,
}

impl LedgerConfig {
    /// Load from the data/ directory.
    /// In tests, use LedgerConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/ledger/ledger_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: LedgerConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the ledger cannot operate under.
    pub fn validate(&self) -> anyhow::Result<()> {
        let c = &self.compliance;
        if c.structuring_floor >= c.large_transaction_threshold {
            anyhow::bail!(
                "structuring_floor {} must be below large_transaction_threshold {}",
                c.structuring_floor,
                c.large_transaction_threshold
            );
        }
        if c.velocity_window_minutes <= 0 {
            anyhow::bail!("velocity_window_minutes must be positive");
        }
        if self.limits.default_daily_limit <= Decimal::ZERO {
            anyhow::bail!("default_daily_limit must be positive");
        }
        if self.loans.min_score > self.loans.max_score {
            anyhow::bail!("loan min_score exceeds max_score");
        }
        if self.settlement.interval_secs == 0 || self.settlement.queue_depth == 0 {
            anyhow::bail!("settlement interval and queue depth must be non-zero");
        }
        Ok(())
    }
}

/// Load the sanctions seed list from `{data_dir}/compliance/sanctions.json`.
pub fn load_sanctions(data_dir: &str) -> anyhow::Result<Vec<SanctionSeed>> {
    let path = format!("{data_dir}/compliance/sanctions.json");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    let file: SanctionsFile = serde_json::from_str(&content)?;
    Ok(file.entries)
}
