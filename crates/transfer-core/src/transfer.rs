//! One user-initiated transfer, end to end.

use chain_sol::{normalize, Address, NATIVE_DECIMALS};
use serde::Serialize;
use tracing::{info, warn, Instrument};

use crate::assembler::assemble;
use crate::builder::{build_transfer_instructions, resolve_decimals, TransferKind};
use crate::config::TransferConfig;
use crate::engine::{ConfirmationEngine, Outcome};
use crate::error::{TransferError, TransferResult};
use crate::rpc::LedgerRpc;
use crate::session::WalletSession;

/// What the user asked for, as entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub recipient: String,
    /// Human decimal amount, e.g. `"1.5"`.
    pub amount: String,
    /// Token mint; `None` moves the native unit.
    pub mint: Option<String>,
    /// Token precision when already known; looked up from the mint
    /// otherwise.
    pub decimals: Option<u8>,
}

impl TransferRequest {
    pub fn native(recipient: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
            mint: None,
            decimals: None,
        }
    }

    pub fn token(
        recipient: impl Into<String>,
        amount: impl Into<String>,
        mint: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
            mint: Some(mint.into()),
            decimals: None,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }
}

/// The result of an attempt plus the one message to show for it.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub result: TransferResult<Outcome>,
    pub message: String,
}

impl TransferReport {
    fn new(result: TransferResult<Outcome>) -> Self {
        let message = match &result {
            Ok(outcome) => outcome.user_message(),
            Err(e) => e.user_message(),
        };
        Self { result, message }
    }

    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(outcome) if outcome.is_confirmed())
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.result.as_ref().ok()
    }
}

/// The shape of a report as logged or shipped to a UI.
#[derive(Serialize)]
struct ReportSummary<'a> {
    success: bool,
    outcome: Option<&'a Outcome>,
    error: Option<String>,
    message: &'a str,
}

impl TransferReport {
    pub fn to_json(&self) -> serde_json::Value {
        let summary = ReportSummary {
            success: self.is_success(),
            outcome: self.outcome(),
            error: self.result.as_ref().err().map(|e| e.kind().to_string()),
            message: &self.message,
        };
        serde_json::to_value(summary).unwrap_or(serde_json::Value::Null)
    }
}

/// Run one transfer attempt with a fresh engine.
pub async fn execute_transfer(
    session: &WalletSession,
    request: &TransferRequest,
    config: &TransferConfig,
) -> TransferReport {
    let engine = ConfirmationEngine::new(config);
    execute_transfer_observed(session, request, config, &engine).await
}

/// Run one transfer attempt on `engine`, whose state the caller may be
/// watching.
pub async fn execute_transfer_observed(
    session: &WalletSession,
    request: &TransferRequest,
    config: &TransferConfig,
    engine: &ConfirmationEngine,
) -> TransferReport {
    let span = tracing::info_span!(
        "transfer",
        recipient = %request.recipient,
        amount = %request.amount,
        mint = request.mint.as_deref().unwrap_or("native"),
    );
    let result = run(session, request, config, engine).instrument(span).await;

    let report = TransferReport::new(result);
    match &report.result {
        Ok(outcome) => info!(outcome = ?outcome.kind(), message = %report.message, "transfer finished"),
        Err(e) => warn!(kind = %e.kind(), error = %e, "transfer aborted"),
    }
    report
}

async fn run(
    session: &WalletSession,
    request: &TransferRequest,
    config: &TransferConfig,
    engine: &ConfirmationEngine,
) -> TransferResult<Outcome> {
    let sender = session.identity()?;
    let recipient = Address::parse(&request.recipient)?;
    let mint = request.mint.as_deref().map(Address::parse).transpose()?;

    // Reject malformed amounts before any network call.
    normalize(&request.amount, 0)?;

    let rpc = session.rpc();
    let level = config.submit.confirmation_level;

    let kind = match mint {
        None => TransferKind::Native,
        Some(mint) => TransferKind::Token {
            mint,
            decimals: resolve_decimals(rpc, &mint, request.decimals).await?,
        },
    };
    let decimals = match kind {
        TransferKind::Native => NATIVE_DECIMALS,
        TransferKind::Token { decimals, .. } => decimals,
    };

    let amount = normalize(&request.amount, decimals)?;
    if amount == 0 {
        return Err(TransferError::InvalidInput(format!(
            "amount {} rounds to zero at {decimals} decimals",
            request.amount
        )));
    }

    let plan = build_transfer_instructions(
        rpc,
        &kind,
        &sender,
        &recipient,
        amount,
        config.priority_fee.as_ref(),
    )
    .await?;
    plan.validate_order()?;
    info!(
        instructions = plan.instructions.len(),
        creates_recipient_account = plan.creates_recipient_account,
        amount_base_units = amount,
        "planned transfer"
    );

    let destination = plan.destination;
    let transaction = assemble(rpc, plan.instructions, sender, level).await?;

    let outcome = engine
        .submit_and_confirm(session, &transaction, &config.submit)
        .await?;

    Ok(match outcome {
        Outcome::Confirmed {
            signature, level, ..
        } => Outcome::Confirmed {
            signature,
            level,
            recipient_balance: recipient_balance(rpc, &kind, &destination).await,
        },
        other => other,
    })
}

/// Post-transfer balance of the credited account. A failed read never
/// turns a confirmed transfer into an error.
async fn recipient_balance(
    rpc: &dyn LedgerRpc,
    kind: &TransferKind,
    destination: &Address,
) -> Option<u64> {
    let balance = match kind {
        TransferKind::Native => rpc.get_balance(destination).await,
        TransferKind::Token { .. } => rpc.get_token_balance(destination).await,
    };
    match balance {
        Ok(balance) => {
            info!(destination = %destination, balance, "recipient balance after transfer");
            Some(balance)
        }
        Err(e) => {
            warn!(destination = %destination, error = %e, "could not read recipient balance");
            None
        }
    }
}
