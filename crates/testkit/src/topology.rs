//! Topology fixtures. Addresses are passed in so tests can bind real listeners first.

/// `payments-orchestrator` calling `payments-processor` (critical) and
/// `accounting-ledger` (best-effort); `payments-processor` also exposes
/// `/settle-payment`, which retries `/process-gateway` at `gateway_addr`.
pub fn payments(orchestrator: &str, processor: &str, ledger: &str, gateway_addr: &str) -> String {
    format!(
        r#"
[[services]]
name = "payments-orchestrator"
team = "payments"
address = "{orchestrator}"

[[services.endpoints]]
path = "/initiate-transfer"
methods = ["GET", "POST"]

[[services.endpoints.calls]]
service = "payment-gateway"
endpoint = "/process-gateway"
criticality = "critical"
timeout = "2s"

[[services.endpoints.calls]]
service = "accounting-ledger"
endpoint = "/get-balance"
timeout = "1s"

[[services]]
name = "payments-processor"
team = "payments"
address = "{processor}"

[[services.endpoints]]
path = "/settle-payment"
methods = ["POST"]

[[services.endpoints.calls]]
service = "payment-gateway"
endpoint = "/process-gateway"
timeout = "2s"
retry = {{ max_attempts = 3, backoff = "500ms" }}

[[services]]
name = "payment-gateway"
team = "payments"
address = "{gateway_addr}"

[[services.endpoints]]
path = "/process-gateway"

[[services]]
name = "accounting-ledger"
team = "accounting"
address = "{ledger}"

[[services.endpoints]]
path = "/get-balance"
"#
    )
}

/// `caller` at `/a` calls `callee` at `/b` directly.
pub fn two_hop(caller: &str, callee: &str) -> String {
    format!(
        r#"
[[services]]
name = "caller"
address = "{caller}"

[[services.endpoints]]
path = "/a"

[[services.endpoints.calls]]
service = "callee"
endpoint = "/b"

[[services]]
name = "callee"
address = "{callee}"

[[services.endpoints]]
path = "/b"
"#
    )
}

/// One endpoint `/work` on `client` with a single call to `target` at `/dep`.
/// `call_extra` is spliced into the call table (retry, chaos, timeout...).
pub fn single_call(client: &str, target: &str, call_extra: &str) -> String {
    format!(
        r#"
[[services]]
name = "client"
address = "{client}"

[[services.endpoints]]
path = "/work"

[[services.endpoints.calls]]
service = "dep"
endpoint = "/dep"
{call_extra}

[[services]]
name = "dep"
address = "{target}"

[[services.endpoints]]
path = "/dep"
"#
    )
}
