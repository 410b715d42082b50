//! Inbound instruction verification and dispatch
//!
//! Instructions arrive signed with the shared secret. The worker strips
//! `access_key` and `hash`, re-canonicalizes the remainder in its original
//! key order and dispatches only when the recomputed HMAC matches.

use super::client::GatewayHandle;
use crate::error::GatewayResult;
use crate::observability::metrics::metrics;
use crate::protocol::{Instruction, InstructionEnvelope};
use crate::signer::{canonical_json, Signer};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn, Instrument};

/// Application hook for verified instructions.
///
/// Invocations are sequential: the next instruction is not dispatched until
/// `handle` returns.
#[async_trait]
pub trait InstructionHandler: Send + Sync + 'static {
    async fn handle(&self, gateway: &GatewayHandle, instruction: Instruction) -> GatewayResult<()>;
}

/// Shared, replaceable handler registration
pub type HandlerSlot = Arc<RwLock<Option<Arc<dyn InstructionHandler>>>>;

/// Why an inbound instruction was discarded
#[derive(Debug, Error, PartialEq)]
pub enum InstructionRejection {
    #[error("malformed instruction: {0}")]
    Malformed(String),
    #[error("instruction carries no hash")]
    MissingHash,
    #[error("instruction signature mismatch")]
    SignatureMismatch,
}

/// What happened to one dequeued instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionOutcome {
    Dispatched,
    Rejected,
    NoHandler,
    HandlerFailed,
}

/// Verify a raw instruction payload and decode it
pub fn verify_instruction(
    signer: &Signer,
    raw: &[u8],
) -> Result<Instruction, InstructionRejection> {
    let mut message: Map<String, Value> = match serde_json::from_slice(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(InstructionRejection::Malformed(format!(
                "expected a JSON object, got {other}"
            )))
        }
        Err(e) => return Err(InstructionRejection::Malformed(e.to_string())),
    };

    // shift_remove keeps the remaining keys in wire order
    message.shift_remove("access_key");
    let hash = match message.shift_remove("hash") {
        Some(Value::String(hash)) => hash,
        _ => return Err(InstructionRejection::MissingHash),
    };

    let canonical =
        canonical_json(&message).map_err(|e| InstructionRejection::Malformed(e.to_string()))?;
    if !signer.verify(canonical.as_bytes(), &hash) {
        return Err(InstructionRejection::SignatureMismatch);
    }

    let envelope: InstructionEnvelope = serde_json::from_value(Value::Object(message))
        .map_err(|e| InstructionRejection::Malformed(e.to_string()))?;
    Ok(Instruction::from(envelope))
}

/// Verify one raw instruction and hand it to the registered handler
pub async fn process_instruction(
    gateway: &GatewayHandle,
    handler: &HandlerSlot,
    raw: &[u8],
) -> InstructionOutcome {
    let instruction = match verify_instruction(gateway.signer(), raw) {
        Ok(instruction) => instruction,
        Err(rejection) => {
            warn!("Discarding instruction: {}", rejection);
            metrics().instruction_rejected();
            return InstructionOutcome::Rejected;
        }
    };

    let Some(handler) = handler.read().await.clone() else {
        warn!(
            alert_key = %instruction.alert_key,
            "Instruction received but no handler is registered - discarded"
        );
        return InstructionOutcome::NoHandler;
    };

    info!(
        thing_key = %instruction.thing_key,
        alert_key = %instruction.alert_key,
        "Dispatching instruction"
    );

    // Own task so a panicking handler surfaces as a JoinError
    let task_gateway = gateway.clone();
    let result =
        tokio::spawn(async move { handler.handle(&task_gateway, instruction).await }).await;

    match result {
        Ok(Ok(())) => {
            metrics().instruction_dispatched();
            InstructionOutcome::Dispatched
        }
        Ok(Err(e)) => {
            error!("Instruction handler failed: {}", e);
            metrics().handler_failed();
            InstructionOutcome::HandlerFailed
        }
        Err(join_error) => {
            error!("Instruction handler panicked: {}", join_error);
            metrics().handler_failed();
            InstructionOutcome::HandlerFailed
        }
    }
}

/// Drain the instruction queue until every sender is gone
pub async fn run_instruction_worker(
    gateway: GatewayHandle,
    mut queue: mpsc::Receiver<Vec<u8>>,
    handler: HandlerSlot,
) {
    let span = crate::instruction_span!(client_id = %gateway.client_id());
    async move {
        info!("Instruction worker started");
        while let Some(raw) = queue.recv().await {
            let outcome = process_instruction(&gateway, &handler, &raw).await;
            debug!(?outcome, "Instruction processed");
        }
        info!("Instruction worker stopped");
    }
    .instrument(span)
    .await
}
