//! Accessibility extractor integration.
//!
//! Asks the desktop accessibility backend for the focused window's text.
//! The app's attribute profile tells the backend which attributes to favour.

use super::{desktop_request, parse_desktop_reply, InvokeContext};
use crate::dispatcher::{backend_ids, DispatchError, Transport};
use crate::types::ExtractionInput;
use tracing::debug;

pub const COMMAND: &str = "extract_focused_text";

pub async fn capture<T: Transport + ?Sized>(
    transport: &T,
    ctx: &InvokeContext<'_>,
) -> Result<ExtractionInput, DispatchError> {
    debug!(
        "Extracting from {} ({}) via accessibility, profile {}",
        ctx.target.app_name,
        ctx.target.bundle_id,
        ctx.profile.attribute_profile.as_str()
    );

    let request = desktop_request(COMMAND, ctx, true);
    let reply = transport
        .exchange(backend_ids::DESKTOP_AX, &request, ctx.timeout, ctx.cancel)
        .await?;
    let reply = parse_desktop_reply(backend_ids::DESKTOP_AX, &reply.value)?;

    Ok(reply.into_input(ctx.target, None))
}
