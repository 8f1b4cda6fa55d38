//! # `tx` Commands
//!
//! Offline helpers for building transactions and actions. Each command
//! returns what it would print, so the encoding logic is testable without
//! capturing stdout.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::Path;

use strata_actions::{FungibleAmount, PatchTableSheet, RenewAdminState, TransferAsset};
use strata_protocol::action::{Action, ActionEnvelope};
use strata_protocol::address::Address;
use strata_protocol::config::HASH_LENGTH;
use strata_protocol::crypto::{Keypair, PublicKey};
use strata_protocol::transaction::Transaction;

use crate::cli::{
    InspectArgs, PatchTableArgs, RenewAdminStateArgs, SignArgs, TransferAssetArgs, UnsignedArgs,
};

/// `arg` itself, or the contents of the file it names.
fn inline_or_file(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(raw.trim().to_string())
    } else {
        Ok(arg.trim().to_string())
    }
}

fn decode_hex_arg(what: &str, arg: &str) -> Result<Vec<u8>> {
    let raw = inline_or_file(arg)?;
    hex::decode(&raw).with_context(|| format!("{} is not valid hex", what))
}

fn parse_actions(args: &[String]) -> Result<Vec<ActionEnvelope>> {
    let registry = strata_actions::default_registry();
    args.iter()
        .enumerate()
        .map(|(i, arg)| {
            let bytes = decode_hex_arg("action", arg)?;
            let envelope = ActionEnvelope::decode(&bytes)
                .with_context(|| format!("action #{} is malformed", i))?;
            // Refuse what no node would be able to run.
            registry
                .load(&envelope)
                .with_context(|| format!("action #{} is not supported", i))?;
            Ok(envelope)
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("`{}` is not an RFC 3339 timestamp", raw))
}

fn parse_genesis(raw: Option<&str>) -> Result<Option<[u8; HASH_LENGTH]>> {
    raw.map(|hex_hash| {
        let bytes = hex::decode(hex_hash.trim()).context("genesis hash is not valid hex")?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("genesis hash must be {} bytes", HASH_LENGTH))
    })
    .transpose()
}

fn parse_address(what: &str, raw: &str) -> Result<Address> {
    Address::from_hex(raw.trim()).with_context(|| format!("invalid {} address", what))
}

/// Signed transaction bytes.
pub fn sign(args: &SignArgs) -> Result<Vec<u8>> {
    let keypair = Keypair::from_hex(&args.private_key).context("invalid private key")?;
    let tx = Transaction::create(
        args.nonce,
        &keypair,
        parse_genesis(args.genesis_hash.as_deref())?,
        parse_timestamp(&args.timestamp)?,
        parse_actions(&args.actions)?,
    )?;
    Ok(tx.serialize(true))
}

/// Unsigned transaction, hex.
pub fn unsigned(args: &UnsignedArgs) -> Result<String> {
    let public_key = PublicKey::from_hex(args.public_key.trim()).context("invalid public key")?;
    let tx = Transaction::create_unsigned(
        args.nonce,
        public_key,
        parse_genesis(args.genesis_hash.as_deref())?,
        parse_actions(&args.actions)?,
        parse_timestamp(&args.timestamp)?,
    )?;
    Ok(hex::encode(tx.serialize(false)))
}

pub fn transfer_asset(args: &TransferAssetArgs) -> Result<String> {
    if args.amount == 0 {
        bail!("amount must be positive");
    }
    let mut action = TransferAsset::new(
        parse_address("sender", &args.sender)?,
        parse_address("recipient", &args.recipient)?,
        FungibleAmount::new(args.ticker.clone(), args.amount),
    );
    if let Some(memo) = &args.memo {
        action = action.with_memo(memo.clone());
    }
    Ok(hex::encode(action.envelope().encode()))
}

/// Returns `(table name, hex action)`.
pub fn patch_table(args: &PatchTableArgs) -> Result<(String, String)> {
    let file_name = args
        .table_path
        .file_name()
        .and_then(|n| n.to_str())
        .context("table path has no file name")?;
    let table_name = file_name.strip_suffix(".csv").unwrap_or(file_name).to_string();
    let csv = std::fs::read_to_string(&args.table_path)
        .with_context(|| format!("failed to read {}", args.table_path.display()))?;
    let action = PatchTableSheet::new(table_name.clone(), csv);
    Ok((table_name, hex::encode(action.envelope().encode())))
}

pub fn renew_admin_state(args: &RenewAdminStateArgs) -> String {
    hex::encode(RenewAdminState::new(args.new_valid_until).envelope().encode())
}

/// Human-readable dump of a transaction. A bad signature is reported in the
/// output rather than treated as an error.
pub fn inspect(args: &InspectArgs) -> Result<String> {
    let bytes = decode_hex_arg("transaction", &args.transaction)?;
    let tx = Transaction::deserialize(&bytes, false).context("malformed transaction")?;

    let mut out = String::new();
    writeln!(out, "id        : {}", tx.id())?;
    writeln!(out, "signer    : {}", tx.signer())?;
    writeln!(out, "public key: {}", tx.public_key().to_hex())?;
    writeln!(out, "nonce     : {}", tx.nonce())?;
    writeln!(out, "timestamp : {}", tx.timestamp().to_rfc3339())?;
    match tx.genesis_hash() {
        Some(hash) => writeln!(out, "genesis   : {}", hex::encode(hash))?,
        None => writeln!(out, "genesis   : -")?,
    }
    let signature = if !tx.is_signed() {
        "absent"
    } else if tx.verify().is_ok() {
        "valid"
    } else {
        "INVALID"
    };
    writeln!(out, "signature : {}", signature)?;
    writeln!(out, "actions   : {}", tx.actions().len())?;
    for (i, action) in tx.actions().iter().enumerate() {
        writeln!(out, "  [{}] {} {}", i, action.type_tag, action.plain_value)?;
    }
    Ok(out)
}
