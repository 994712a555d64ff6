//! OCR extractor integration.
//!
//! The OCR backend screenshots the focused window and runs text recognition.
//! It reports a recognition confidence, which feeds the capture's confidence.

use super::{desktop_request, parse_desktop_reply, InvokeContext};
use crate::dispatcher::{backend_ids, DispatchError, Transport};
use crate::types::ExtractionInput;
use tracing::debug;

pub const COMMAND: &str = "extract_ocr_text";

pub async fn capture<T: Transport + ?Sized>(
    transport: &T,
    ctx: &InvokeContext<'_>,
) -> Result<ExtractionInput, DispatchError> {
    debug!(
        "Extracting from {} ({}) via OCR",
        ctx.target.app_name, ctx.target.bundle_id
    );

    let request = desktop_request(COMMAND, ctx, false);
    let reply = transport
        .exchange(backend_ids::DESKTOP_OCR, &request, ctx.timeout, ctx.cancel)
        .await?;
    let reply = parse_desktop_reply(backend_ids::DESKTOP_OCR, &reply.value)?;
    let confidence = reply.confidence.map(normalize_confidence);

    Ok(reply.into_input(ctx.target, confidence))
}

/// Clamp a reported confidence to 0.0-1.0, accepting percentages
fn normalize_confidence(reported: f64) -> f64 {
    if !reported.is_finite() {
        return 0.0;
    }
    let value = if reported > 1.0 { reported / 100.0 } else { reported };
    value.clamp(0.0, 1.0)
}
