//! Fund operation routing
//!
//! Every operation walks `Requested -> Validated -> RemoteExecuting ->
//! {Confirmed | RemoteFailed}`. Exactly one venue balance adjustment is issued
//! per operation and nothing is retried. A local record exists only for
//! confirmed operations, or for explicit fallbacks that carry a marker.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::FundsConfig;
use crate::connection::ManagedConnection;
use crate::domain::{
    AuditEntry, BalanceOperation, FundOpState, FundOperationKind, FundOperationRecord,
    FundRequest, FundStatus, Login, SagaState, TransferRequest, TransferSaga,
};
use crate::error::{ErrorKind, GatewayError, Result};
use crate::gateway::AccountGateway;
use crate::persistence::RecordStore;

/// Marker prefixed to the comment of local-only operations
pub const FALLBACK_MARKER: &str = "[fallback]";

/// Whether the caller accepts a local-only adjustment when the venue is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    #[default]
    RemoteOnly,
    AllowLocal,
}

/// Outcome of a confirmed internal transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub saga: TransferSaga,
    pub debit: FundOperationRecord,
    pub credit: FundOperationRecord,
}

/// Tracks one operation through its state machine
struct Progress {
    id: Uuid,
    state: FundOpState,
}

impl Progress {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: FundOpState::Requested,
        }
    }

    fn advance(&mut self, next: FundOpState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal fund transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

#[derive(Clone)]
pub struct FundRouter {
    gateway: AccountGateway,
    store: Arc<dyn RecordStore>,
    max_amount: Option<Decimal>,
    allow_fallback: bool,
}

impl FundRouter {
    pub fn new(gateway: AccountGateway, store: Arc<dyn RecordStore>, config: &FundsConfig) -> Self {
        Self {
            gateway,
            store,
            max_amount: config.max_operation_amount,
            allow_fallback: config.allow_offline_fallback,
        }
    }

    // ==================== Named operations ====================

    pub async fn deposit(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::Deposit, login, amount, comment, actor))
            .await
    }

    pub async fn withdraw(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::Withdraw, login, amount, comment, actor))
            .await
    }

    pub async fn credit_in(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::CreditIn, login, amount, comment, actor))
            .await
    }

    pub async fn credit_out(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::CreditOut, login, amount, comment, actor))
            .await
    }

    pub async fn bonus_in(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::BonusIn, login, amount, comment, actor))
            .await
    }

    pub async fn bonus_out(
        &self,
        login: Login,
        amount: Decimal,
        comment: &str,
        actor: &str,
    ) -> Result<FundOperationRecord> {
        self.execute(request(FundOperationKind::BonusOut, login, amount, comment, actor))
            .await
    }

    /// Single-account operation against the venue only
    pub async fn execute(&self, request: FundRequest) -> Result<FundOperationRecord> {
        self.execute_with(request, FallbackPolicy::RemoteOnly).await
    }

    /// Single-account operation; `AllowLocal` is honoured only when the
    /// service is configured to permit fallbacks.
    #[instrument(skip(self, request), fields(kind = %request.kind, login = request.login))]
    pub async fn execute_with(
        &self,
        request: FundRequest,
        policy: FallbackPolicy,
    ) -> Result<FundOperationRecord> {
        let mut progress = Progress::new();

        if request.kind == FundOperationKind::Transfer {
            return Err(GatewayError::Validation(
                "transfers need a source and destination; use transfer()".into(),
            ));
        }
        self.validate_amount(request.amount)?;
        self.validate_owner(request.login, request.expected_owner).await?;
        progress.advance(FundOpState::Validated);

        let conn = match self.gateway.connections().get_connection().await {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::ConnectionUnavailable => {
                if policy == FallbackPolicy::AllowLocal && self.allow_fallback {
                    return self.local_fallback(&request, &e).await;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if request.kind.is_outflow() {
            self.ensure_covered(&conn, &request).await?;
        }

        progress.advance(FundOpState::RemoteExecuting);
        let signed = request.kind.signed(request.amount);
        let adjusted = self
            .remote_adjust(
                conn,
                request.login,
                signed,
                request.kind.balance_operation(),
                &request.comment,
            )
            .await;

        let (deal_id, balance_after) = match adjusted {
            Ok(done) => done,
            Err(e) => {
                progress.advance(FundOpState::RemoteFailed);
                warn!(
                    "Fund operation {} {} on {} failed remotely: {}",
                    progress.id, request.kind, request.login, e
                );
                return Err(e);
            }
        };
        progress.advance(FundOpState::Confirmed);

        let record = FundOperationRecord {
            id: progress.id,
            kind: request.kind,
            login: request.login,
            amount: signed,
            comment: request.comment.clone(),
            status: FundStatus::Approved,
            actor: request.actor.clone(),
            fallback: false,
            venue_deal_id: Some(deal_id),
            balance_after,
            created_at: Utc::now(),
        };
        self.persist_confirmed(&record).await?;
        self.audit(
            &request.actor,
            &format!("fund.{}", request.kind),
            request.login,
            json!({
                "operation_id": record.id,
                "amount": signed,
                "deal_id": deal_id,
                "balance_after": balance_after,
                "comment": request.comment,
            }),
        )
        .await;

        info!(
            "Fund operation {} confirmed: {} {} on {} (deal {})",
            record.id, request.kind, request.amount, request.login, deal_id
        );
        Ok(record)
    }

    // ==================== Transfers ====================

    /// Withdraw from the source, then deposit to the destination.
    ///
    /// Saga state is persisted between the legs. A refused deposit triggers one
    /// reversal attempt on the source; a leg that timed out is left open for
    /// reconciliation since the venue may still apply it.
    #[instrument(skip(self, request), fields(from = request.from_login, to = request.to_login))]
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        if request.from_login == request.to_login {
            return Err(GatewayError::Validation(
                "source and destination accounts must differ".into(),
            ));
        }
        self.validate_amount(request.amount)?;
        self.validate_owner(request.from_login, request.expected_owner)
            .await?;
        self.validate_owner(request.to_login, request.expected_owner)
            .await?;

        let conn = self.gateway.connections().get_connection().await?;
        let source_request = FundRequest {
            kind: FundOperationKind::Withdraw,
            login: request.from_login,
            amount: request.amount,
            comment: request.comment.clone(),
            actor: request.actor.clone(),
            expected_owner: request.expected_owner,
        };
        self.ensure_covered(&conn, &source_request).await?;

        let now = Utc::now();
        let mut saga = TransferSaga {
            id: Uuid::new_v4(),
            from_login: request.from_login,
            to_login: request.to_login,
            amount: request.amount,
            state: SagaState::Started,
            actor: request.actor.clone(),
            comment: request.comment.clone(),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_transfer_saga(&saga).await?;

        // Leg 1: debit the source
        let debit_comment = format!("Transfer to {} {}", request.to_login, request.comment);
        let debit = match self
            .remote_adjust(
                conn,
                request.from_login,
                -request.amount,
                BalanceOperation::Balance,
                debit_comment.trim_end(),
            )
            .await
        {
            Ok(done) => done,
            Err(e) => {
                let state = if outcome_unknown(&e) {
                    error!(
                        "Transfer {} source debit unconfirmed, {} may still leave {}: {}",
                        saga.id, request.amount, request.from_login, e
                    );
                    SagaState::DebitUnconfirmed
                } else {
                    SagaState::Aborted
                };
                self.move_saga(&mut saga, state, Some(&e.to_string())).await;
                return Err(e);
            }
        };
        self.move_saga(&mut saga, SagaState::SourceDebited, None)
            .await;
        let debit_record = self
            .transfer_leg(&saga, request.from_login, -request.amount, debit_comment.trim_end(), debit)
            .await;

        // Leg 2: credit the destination, even if leg 1 bookkeeping failed
        let credit_comment = format!("Transfer from {} {}", request.from_login, request.comment);
        let credit_result = match self.gateway.connections().get_connection().await {
            Ok(conn) => {
                self.remote_adjust(
                    conn,
                    request.to_login,
                    request.amount,
                    BalanceOperation::Balance,
                    credit_comment.trim_end(),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let credit = match credit_result {
            Ok(done) => done,
            Err(e) if outcome_unknown(&e) => {
                error!(
                    "Transfer {} destination credit unconfirmed, not reversing {} debited from {}: {}",
                    saga.id, request.amount, request.from_login, e
                );
                self.move_saga(&mut saga, SagaState::CreditUnconfirmed, Some(&e.to_string()))
                    .await;
                return Err(e);
            }
            Err(e) => {
                self.compensate(&mut saga, &e).await;
                return Err(e);
            }
        };
        let credit_record = self
            .transfer_leg(&saga, request.to_login, request.amount, credit_comment.trim_end(), credit)
            .await;
        self.move_saga(&mut saga, SagaState::Completed, None).await;

        self.audit(
            &request.actor,
            "fund.transfer",
            format!("{}->{}", request.from_login, request.to_login),
            json!({
                "saga_id": saga.id,
                "amount": request.amount,
                "debit_deal": debit.0,
                "credit_deal": credit.0,
            }),
        )
        .await;

        info!(
            "Transfer {} completed: {} from {} to {}",
            saga.id, request.amount, request.from_login, request.to_login
        );
        Ok(TransferReceipt {
            saga,
            debit: debit_record?,
            credit: credit_record?,
        })
    }

    /// Transfers left between legs (crash, unconfirmed leg, or failed reversal)
    pub async fn pending_transfers(&self) -> Result<Vec<TransferSaga>> {
        self.store.pending_transfer_sagas().await
    }

    async fn compensate(&self, saga: &mut TransferSaga, cause: &GatewayError) {
        warn!(
            "Transfer {} destination credit failed ({}), reversing source debit",
            saga.id, cause
        );
        let comment = format!("Transfer {} reversal", saga.id);
        let reversal = match self.gateway.connections().get_connection().await {
            Ok(conn) => {
                self.remote_adjust(
                    conn,
                    saga.from_login,
                    saga.amount,
                    BalanceOperation::Balance,
                    &comment,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match reversal {
            Ok(done) => {
                let _ = self
                    .transfer_leg(saga, saga.from_login, saga.amount, &comment, done)
                    .await;
                self.move_saga(saga, SagaState::Compensated, Some(&cause.to_string()))
                    .await;
            }
            Err(e) if outcome_unknown(&e) => {
                error!(
                    "Transfer {} reversal unconfirmed, check {} on {} before retrying: {}",
                    saga.id, saga.amount, saga.from_login, e
                );
                let detail = format!("credit failed: {cause}; reversal unconfirmed: {e}");
                self.move_saga(saga, SagaState::ReversalUnconfirmed, Some(&detail))
                    .await;
            }
            Err(e) => {
                error!(
                    "Transfer {} reversal failed, {} debited from {} needs manual reconciliation: {}",
                    saga.id, saga.amount, saga.from_login, e
                );
                let detail = format!("credit failed: {cause}; reversal failed: {e}");
                self.move_saga(saga, SagaState::CompensationFailed, Some(&detail))
                    .await;
            }
        }
    }

    async fn move_saga(&self, saga: &mut TransferSaga, state: SagaState, last_error: Option<&str>) {
        saga.state = state;
        saga.last_error = last_error.map(str::to_string);
        saga.updated_at = Utc::now();
        if let Err(e) = self
            .store
            .update_transfer_saga(saga.id, state, last_error)
            .await
        {
            error!(
                "Failed to persist transfer {} state {}: {}",
                saga.id,
                state.as_str(),
                e
            );
        }
    }

    async fn transfer_leg(
        &self,
        saga: &TransferSaga,
        login: Login,
        signed: Decimal,
        comment: &str,
        (deal_id, balance_after): (u64, Option<Decimal>),
    ) -> Result<FundOperationRecord> {
        let record = FundOperationRecord {
            id: Uuid::new_v4(),
            kind: FundOperationKind::Transfer,
            login,
            amount: signed,
            comment: comment.to_string(),
            status: FundStatus::Approved,
            actor: saga.actor.clone(),
            fallback: false,
            venue_deal_id: Some(deal_id),
            balance_after,
            created_at: Utc::now(),
        };
        self.persist_confirmed(&record).await?;
        Ok(record)
    }

    // ==================== Steps ====================

    fn validate_amount(&self, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(GatewayError::Validation(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if let Some(max) = self.max_amount {
            if amount > max {
                return Err(GatewayError::LimitReached(format!(
                    "amount {amount} exceeds the per-operation maximum of {max}"
                )));
            }
        }
        Ok(())
    }

    /// The account must be registered to the owner the caller claims
    async fn validate_owner(&self, login: Login, expected_owner: Option<i64>) -> Result<()> {
        let Some(owner) = expected_owner else {
            return Ok(());
        };
        match self.store.find_account_by_login(login).await? {
            Some(record) if record.owner_user_id == owner => Ok(()),
            Some(_) => Err(GatewayError::Validation(format!(
                "account {login} does not belong to user {owner}"
            ))),
            None => Err(GatewayError::Validation(format!(
                "account {login} is not registered"
            ))),
        }
    }

    async fn ensure_covered(
        &self,
        conn: &Arc<ManagedConnection>,
        request: &FundRequest,
    ) -> Result<()> {
        let login = request.login;
        let figures = self
            .gateway
            .call_on(conn.clone(), "user_account_get", login, move |s| {
                s.user_account_get(login)
            })
            .await?;
        let available = match request.kind.balance_operation() {
            BalanceOperation::Credit => figures.credit,
            BalanceOperation::Balance | BalanceOperation::Bonus => figures.balance,
        };
        if available < request.amount {
            return Err(GatewayError::InsufficientFunds {
                requested: request.amount,
                available,
            });
        }
        Ok(())
    }

    /// One DealerBalance call on a revalidated handle; reads back the balance
    async fn remote_adjust(
        &self,
        conn: Arc<ManagedConnection>,
        login: Login,
        signed: Decimal,
        operation: BalanceOperation,
        comment: &str,
    ) -> Result<(u64, Option<Decimal>)> {
        let connections = self.gateway.connections();
        let conn = if connections.is_current(&conn) {
            conn
        } else {
            info!("Venue handle rotated before fund call, reacquiring");
            connections.get_connection().await?
        };

        let comment = comment.to_string();
        let result = self
            .gateway
            .call_on(conn, "dealer_balance", login, move |s| {
                let deal_id = s.dealer_balance(login, signed, operation, &comment)?;
                let balance_after = s.user_account_get(login).ok().map(|f| f.balance);
                Ok((deal_id, balance_after))
            })
            .await;

        result.map_err(|e| match e {
            GatewayError::InsufficientFunds { .. } => GatewayError::InsufficientFunds {
                requested: signed.abs(),
                available: Decimal::ZERO,
            },
            other => other,
        })
    }

    async fn persist_confirmed(&self, record: &FundOperationRecord) -> Result<()> {
        if let Err(e) = self.store.create_fund_operation_record(record).await {
            error!(
                "Venue confirmed deal {:?} on {} but the record could not be stored: {}",
                record.venue_deal_id, record.login, e
            );
            return Err(e);
        }
        if let Some(balance) = record.balance_after {
            if self.store.find_account_by_login(record.login).await?.is_some() {
                self.store.update_account_balance(record.login, balance).await?;
            }
        }
        Ok(())
    }

    /// Local-only adjustment, recorded with the fallback marker
    async fn local_fallback(
        &self,
        request: &FundRequest,
        cause: &GatewayError,
    ) -> Result<FundOperationRecord> {
        let account = self
            .store
            .find_account_by_login(request.login)
            .await?
            .ok_or(GatewayError::AccountNotFound {
                login: request.login,
            })?;

        let signed = request.kind.signed(request.amount);
        let new_balance = account.balance + signed;
        if request.kind.is_outflow() && new_balance < Decimal::ZERO {
            return Err(GatewayError::InsufficientFunds {
                requested: request.amount,
                available: account.balance,
            });
        }

        warn!(
            "Venue unavailable ({}), applying {} {} to {} locally",
            cause, request.kind, request.amount, request.login
        );
        self.store
            .update_account_balance(request.login, new_balance)
            .await?;

        let record = FundOperationRecord {
            id: Uuid::new_v4(),
            kind: request.kind,
            login: request.login,
            amount: signed,
            comment: format!("{FALLBACK_MARKER} {}", request.comment).trim_end().to_string(),
            status: FundStatus::Approved,
            actor: request.actor.clone(),
            fallback: true,
            venue_deal_id: None,
            balance_after: Some(new_balance),
            created_at: Utc::now(),
        };
        self.store.create_fund_operation_record(&record).await?;
        self.audit(
            &request.actor,
            "fund.fallback",
            request.login,
            json!({
                "operation_id": record.id,
                "kind": request.kind,
                "amount": signed,
                "reason": cause.to_string(),
            }),
        )
        .await;
        Ok(record)
    }

    async fn audit(
        &self,
        actor: &str,
        action: &str,
        target: impl ToString,
        details: serde_json::Value,
    ) {
        let entry = AuditEntry::new(actor, action, target.to_string(), details);
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!("Failed to append audit entry {}: {}", action, e);
        }
    }
}

/// A venue call that timed out, or whose worker died, may still be applied
fn outcome_unknown(e: &GatewayError) -> bool {
    matches!(e.kind(), ErrorKind::Timeout | ErrorKind::Internal)
}

fn request(
    kind: FundOperationKind,
    login: Login,
    amount: Decimal,
    comment: &str,
    actor: &str,
) -> FundRequest {
    FundRequest {
        kind,
        login,
        amount,
        comment: comment.to_string(),
        actor: actor.to_string(),
        expected_owner: None,
    }
}
