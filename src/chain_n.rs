//! Chain-N adapter: UTXO-style chain, native token/asset registry, CLI-driven.
//!
//! The CLI subprocess is invoked with an argument list, never a shell string.
//! stdout/stderr are captured and stderr is classified into adapter error
//! categories by substring match without leaking the raw text past this
//! module.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::AdapterError;

#[derive(Debug, Clone)]
pub struct NexusAccount {
    pub address: String,
    pub token_name: String,
    pub balance_base_units: i64,
    pub owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NexusTransaction {
    pub txid: String,
    pub contract_id: String,
    pub ts: i64,
    pub from: String,
    pub to: String,
    pub amount_base_units: i64,
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NexusAsset {
    pub name: String,
    pub fields: HashMap<String, String>,
}

#[async_trait::async_trait]
pub trait ChainNAdapter: Send + Sync {
    async fn get_account(&self, addr: &str) -> Result<Option<NexusAccount>, AdapterError>;

    async fn list_transactions_for_account(
        &self,
        addr: &str,
        limit: usize,
    ) -> Result<Vec<NexusTransaction>, AdapterError>;

    /// Debits `from` and sends to `to`, decimal-string amount, carrying integer `reference`.
    /// Returns `(ok, txid)`. `amount_decimal` is already rounded down to the token's
    /// native decimal precision by the caller — this is the adapter boundary
    /// where base units become a decimal string (§4.2).
    async fn debit_account(
        &self,
        from: &str,
        to: &str,
        amount_decimal: &str,
        reference: i64,
    ) -> Result<(bool, String), AdapterError>;

    async fn transfer_between_accounts(
        &self,
        from: &str,
        to: &str,
        amount_decimal: &str,
        reference: &str,
    ) -> Result<(bool, String), AdapterError>;

    async fn get_transaction_confirmations(&self, txid: &str) -> Result<u32, AdapterError>;

    async fn get_token_supply(&self, token_name: &str) -> Result<i64, AdapterError>;

    async fn update_asset(
        &self,
        asset_name: &str,
        fields: &HashMap<String, String>,
    ) -> Result<bool, AdapterError>;

    async fn get_asset(&self, asset_name: &str) -> Result<Option<NexusAsset>, AdapterError>;

    /// Finds asset-registry entries matching `predicate` fields (e.g. `txid_toService`,
    /// `owner`), returning the oldest match first by `(created, modified)`.
    async fn find_asset_by_fields(
        &self,
        predicate: &HashMap<String, String>,
    ) -> Result<Vec<NexusAsset>, AdapterError>;
}

/// Rounds a base-unit integer amount down to `decimals` places and formats it the
/// way the Nexus CLI expects: a plain decimal string, trailing zeros stripped,
/// never scientific notation.
pub fn format_decimal_amount(amount_base_units: i64, decimals: u32) -> String {
    if decimals == 0 {
        return amount_base_units.to_string();
    }
    let divisor = 10_i64.pow(decimals);
    let whole = amount_base_units / divisor;
    let frac = (amount_base_units % divisor).unsigned_abs();
    let mut frac_str = format!("{:0width$}", frac, width = decimals as usize);
    while frac_str.ends_with('0') {
        frac_str.pop();
    }
    if frac_str.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{frac_str}")
    }
}

/// Lenient JSON extraction: full parse, then per-line parse, then a
/// brace-matching substring scan, for CLI output that may carry a banner
/// line ahead of the JSON payload.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Some(v);
    }
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(v) = serde_json::from_str::<Value>(line) {
            return Some(v);
        }
    }
    let start = text.find(['{', '['])?;
    let open = text.as_bytes()[start] as char;
    let close = if open == '{' { '}' } else { ']' };
    let mut depth = 0i32;
    for (i, c) in text[start..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let candidate = &text[start..start + i + c.len_utf8()];
                if let Ok(v) = serde_json::from_str::<Value>(candidate) {
                    return Some(v);
                }
                break;
            }
        }
    }
    None
}

fn classify_stderr(stderr: &str) -> AdapterError {
    let lower = stderr.to_lowercase();
    if lower.contains("already processed") || lower.contains("duplicate reference") {
        AdapterError::Rejected("duplicate reference".into())
    } else if lower.contains("insufficient") || lower.contains("balance") {
        AdapterError::Rejected("insufficient balance".into())
    } else if lower.contains("timeout") || lower.contains("connection") {
        AdapterError::Timeout("cli connection".into())
    } else if lower.contains("pin") || lower.contains("unlock") {
        AdapterError::Rejected("account locked".into())
    } else {
        AdapterError::Unavailable("cli invocation failed".into())
    }
}

pub struct CliChainNAdapter {
    cli_path: String,
    pin: String,
    call_timeout: Duration,
}

impl CliChainNAdapter {
    pub fn new(cli_path: String, pin: String, call_timeout: Duration) -> Self {
        Self {
            cli_path,
            pin,
            call_timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Value, AdapterError> {
        debug!(args = ?args, "invoking nexus cli");
        let pin_arg = format!("pin={}", self.pin);

        let output = timeout(
            self.call_timeout,
            Command::new(&self.cli_path)
                .args(args)
                .arg(&pin_arg)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| AdapterError::Timeout(format!("cli call timed out: {args:?}")))?
        .map_err(|e| AdapterError::Unavailable(format!("cli spawn failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            error!(args = ?args, exit_code = ?output.status.code(), "nexus cli call failed (details in server logs)");
            return Err(classify_stderr(&stderr));
        }

        parse_json_lenient(&stdout)
            .ok_or_else(|| AdapterError::Unavailable("cli returned unparseable output".into()))
    }
}

#[async_trait::async_trait]
impl ChainNAdapter for CliChainNAdapter {
    async fn get_account(&self, addr: &str) -> Result<Option<NexusAccount>, AdapterError> {
        let result = self
            .run(&["finance/get/account", &format!("address={addr}")])
            .await?;
        if result.get("error").is_some() {
            return Ok(None);
        }
        Ok(Some(NexusAccount {
            address: addr.to_string(),
            token_name: result.get("token_name").and_then(Value::as_str).unwrap_or_default().to_string(),
            balance_base_units: result
                .get("balance")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
            owner: result.get("owner").and_then(Value::as_str).map(str::to_string),
        }))
    }

    async fn list_transactions_for_account(
        &self,
        addr: &str,
        limit: usize,
    ) -> Result<Vec<NexusTransaction>, AdapterError> {
        let result = self
            .run(&[
                "finance/transactions/token",
                &format!("address={addr}"),
                &format!("limit={limit}"),
            ])
            .await?;

        let entries = result.as_array().cloned().unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                Some(NexusTransaction {
                    txid: e.get("txid").and_then(Value::as_str)?.to_string(),
                    contract_id: e.get("contract").and_then(Value::as_str).unwrap_or_default().to_string(),
                    ts: e.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
                    from: e.get("from").and_then(Value::as_str).unwrap_or_default().to_string(),
                    to: e.get("to").and_then(Value::as_str).unwrap_or_default().to_string(),
                    amount_base_units: e
                        .get("amount")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<i64>().ok())
                        .unwrap_or(0),
                    reference: e.get("reference").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect())
    }

    async fn debit_account(
        &self,
        from: &str,
        to: &str,
        amount_decimal: &str,
        reference: i64,
    ) -> Result<(bool, String), AdapterError> {
        let from_arg = format!("from={from}");
        let to_arg = format!("to={to}");
        let amount_arg = format!("amount={amount_decimal}");
        let reference_arg = format!("reference={reference}");
        let result = self
            .run(&["finance/debit/account", &from_arg, &to_arg, &amount_arg, &reference_arg])
            .await?;
        let txid = result.get("txid").and_then(Value::as_str).unwrap_or_default().to_string();
        let ok = result.get("success").and_then(Value::as_bool).unwrap_or(!txid.is_empty());
        Ok((ok, txid))
    }

    async fn transfer_between_accounts(
        &self,
        from: &str,
        to: &str,
        amount_decimal: &str,
        reference: &str,
    ) -> Result<(bool, String), AdapterError> {
        let from_arg = format!("from={from}");
        let to_arg = format!("to={to}");
        let amount_arg = format!("amount={amount_decimal}");
        let reference_arg = format!("reference={reference}");
        let result = self
            .run(&["finance/debit/account", &from_arg, &to_arg, &amount_arg, &reference_arg])
            .await?;
        let txid = result.get("txid").and_then(Value::as_str).unwrap_or_default().to_string();
        let ok = result.get("success").and_then(Value::as_bool).unwrap_or(!txid.is_empty());
        Ok((ok, txid))
    }

    async fn get_transaction_confirmations(&self, txid: &str) -> Result<u32, AdapterError> {
        let result = self
            .run(&["ledger/get/transaction", &format!("txid={txid}")])
            .await?;
        Ok(result.get("confirmations").and_then(Value::as_u64).unwrap_or(0) as u32)
    }

    async fn get_token_supply(&self, token_name: &str) -> Result<i64, AdapterError> {
        let result = self
            .run(&["finance/get/token", &format!("name={token_name}")])
            .await?;
        result
            .get("supply")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| AdapterError::Unavailable("missing token supply".into()))
    }

    async fn update_asset(
        &self,
        asset_name: &str,
        fields: &HashMap<String, String>,
    ) -> Result<bool, AdapterError> {
        let name_arg = format!("name={asset_name}");
        let mut args: Vec<String> = vec![name_arg];
        for (k, v) in fields {
            args.push(format!("{k}={v}"));
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut full = vec!["assets/update/asset"];
        full.extend(args_ref);
        let result = self.run(&full).await?;
        let ok = result.get("success").and_then(Value::as_bool).unwrap_or(false);
        if !ok {
            warn!(asset_name, "asset update not acknowledged on-chain");
        }
        Ok(ok)
    }

    async fn get_asset(&self, asset_name: &str) -> Result<Option<NexusAsset>, AdapterError> {
        let result = self
            .run(&["assets/get/asset", &format!("name={asset_name}")])
            .await?;
        if result.get("error").is_some() {
            return Ok(None);
        }
        let fields = result
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(NexusAsset {
            name: asset_name.to_string(),
            fields,
        }))
    }

    async fn find_asset_by_fields(
        &self,
        predicate: &HashMap<String, String>,
    ) -> Result<Vec<NexusAsset>, AdapterError> {
        let args: Vec<String> = predicate.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut full = vec!["assets/list/assets"];
        full.extend(args_ref);
        let result = self.run(&full).await?;
        let entries = result.as_array().cloned().unwrap_or_default();
        let mut assets: Vec<(i64, i64, NexusAsset)> = entries
            .into_iter()
            .filter_map(|e| {
                let name = e.get("name").and_then(Value::as_str)?.to_string();
                let created = e.get("created").and_then(Value::as_i64).unwrap_or(0);
                let modified = e.get("modified").and_then(Value::as_i64).unwrap_or(0);
                let fields = e
                    .as_object()?
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                Some((created, modified, NexusAsset { name, fields }))
            })
            .collect();
        assets.sort_by_key(|(created, modified, _)| (*created, *modified));
        Ok(assets.into_iter().map(|(_, _, a)| a).collect())
    }
}


#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockChainNAdapter {
        pub accounts: Mutex<HashMap<String, NexusAccount>>,
        pub transactions: Mutex<Vec<NexusTransaction>>,
        pub debit_result: Mutex<Option<Result<(bool, String), String>>>,
        pub debits: Mutex<Vec<(String, String, String, i64)>>,
        pub confirmations: Mutex<HashMap<String, u32>>,
        pub supply: Mutex<i64>,
        pub assets: Mutex<HashMap<String, NexusAsset>>,
        pub asset_update_acked: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl ChainNAdapter for MockChainNAdapter {
        async fn get_account(&self, addr: &str) -> Result<Option<NexusAccount>, AdapterError> {
            Ok(self.accounts.lock().unwrap().get(addr).cloned())
        }

        async fn list_transactions_for_account(
            &self,
            _addr: &str,
            limit: usize,
        ) -> Result<Vec<NexusTransaction>, AdapterError> {
            Ok(self.transactions.lock().unwrap().iter().take(limit).cloned().collect())
        }

        async fn debit_account(
            &self,
            from: &str,
            to: &str,
            amount_decimal: &str,
            reference: i64,
        ) -> Result<(bool, String), AdapterError> {
            self.debits.lock().unwrap().push((
                from.to_string(),
                to.to_string(),
                amount_decimal.to_string(),
                reference,
            ));
            match self.debit_result.lock().unwrap().clone() {
                Some(Ok(v)) => Ok(v),
                Some(Err(e)) => Err(AdapterError::Rejected(e)),
                None => Ok((true, format!("mock-txid-{}", self.debits.lock().unwrap().len()))),
            }
        }

        async fn transfer_between_accounts(
            &self,
            from: &str,
            to: &str,
            amount_decimal: &str,
            _reference: &str,
        ) -> Result<(bool, String), AdapterError> {
            self.debit_account(from, to, amount_decimal, 0).await
        }

        async fn get_transaction_confirmations(&self, txid: &str) -> Result<u32, AdapterError> {
            Ok(*self.confirmations.lock().unwrap().get(txid).unwrap_or(&0))
        }

        async fn get_token_supply(&self, _token_name: &str) -> Result<i64, AdapterError> {
            Ok(*self.supply.lock().unwrap())
        }

        async fn update_asset(
            &self,
            _asset_name: &str,
            _fields: &HashMap<String, String>,
        ) -> Result<bool, AdapterError> {
            Ok(*self.asset_update_acked.lock().unwrap())
        }

        async fn get_asset(&self, asset_name: &str) -> Result<Option<NexusAsset>, AdapterError> {
            Ok(self.assets.lock().unwrap().get(asset_name).cloned())
        }

        async fn find_asset_by_fields(
            &self,
            _predicate: &HashMap<String, String>,
        ) -> Result<Vec<NexusAsset>, AdapterError> {
            Ok(self.assets.lock().unwrap().values().cloned().collect())
        }
    }
}
