//! Browser bridge integration.
//!
//! Browser bridges (the extension native-messaging host and the live
//! AppleScript extractor) speak versioned envelopes: one
//! `host-capture-request` in, one `extension-capture-result` or
//! `extension-error` out.

use super::{non_empty, InvokeContext};
use crate::dispatcher::{exchange_envelope, DispatchError, Transport};
use crate::protocol::{self, BrowserCapture, Envelope, HostCaptureRequest, Payload, PROTOCOL_VERSION};
use crate::types::{dedupe_links, CaptureRequest, ErrorCode, ExtractionInput, InputMetadata};
use chrono::{SecondsFormat, Utc};
use std::time::Duration;
use tracing::debug;

/// Build the request envelope sent to a bridge
pub fn build_request(request: &CaptureRequest, timeout: Duration) -> Envelope {
    protocol::encode(
        uuid::Uuid::new_v4().to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        Payload::CaptureRequest(HostCaptureRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request.request_id.clone(),
            mode: request.mode,
            requested_at: request.requested_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            timeout_ms: timeout.as_millis() as u64,
            include_selection_text: request.include_selection_text,
        }),
    )
}

/// Ask one bridge for the active tab's content
pub async fn capture<T: Transport + ?Sized>(
    transport: &T,
    backend: &str,
    ctx: &InvokeContext<'_>,
) -> Result<ExtractionInput, DispatchError> {
    let envelope = build_request(ctx.request, ctx.timeout);
    let reply = exchange_envelope(transport, backend, &envelope, ctx.timeout, ctx.cancel).await?;

    match reply.payload {
        Payload::CaptureResult(result) => {
            debug!(
                "Bridge {} returned {} chars for {}",
                backend,
                result.capture.full_text.chars().count(),
                result.capture.url
            );
            let mut input = into_extraction_input(result.capture);
            if input.url.trim().is_empty() {
                input.url = super::origin_for(ctx.target);
            }
            if input.title.trim().is_empty() {
                input.title = non_empty(&ctx.target.window_title).unwrap_or_default();
            }
            Ok(input)
        }
        other => Err(DispatchError::failed(
            ErrorCode::PayloadInvalid,
            format!("backend '{}' replied with {}", backend, other.message_type().as_str()),
        )),
    }
}

/// Map a bridge capture onto the backend-agnostic input
pub fn into_extraction_input(capture: BrowserCapture) -> ExtractionInput {
    ExtractionInput {
        url: capture.url,
        title: capture.title,
        full_text: capture.full_text,
        headings: capture.headings,
        links: dedupe_links(&capture.links),
        metadata: InputMetadata {
            description: capture.meta_description,
            site_name: capture.site_name,
            language: capture.language,
            author: capture.author,
            published_time: capture.published_time,
            selection_text: capture.selection_text,
            ..Default::default()
        },
        warnings: capture.extraction_warnings,
        confidence: None,
    }
}
