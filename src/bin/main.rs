// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wallet_ledger::{
    AuditNotifier, Engine, InMemoryOrders, InMemoryUsers, LedgerConfig, LedgerError, OrderId,
    OrderInfo, OrderStatus, PaymentId, PaymentMethod, UserId,
};

/// Wallet Ledger - Apply wallet and payment commands from a CSV file
///
/// Reads commands from a CSV file, applies them in order and writes the
/// resulting wallets to stdout. Logs go to stderr (filter with RUST_LOG).
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Applies wallet and payment commands from a CSV file", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,user,reference,amount,detail
    /// Example: cargo run -- commands.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Journal file; state is restored from it and new commits appended
    #[arg(long, value_name = "PATH")]
    journal: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match LedgerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {}", e);
                process::exit(1);
            }
        },
        None => LedgerConfig::default(),
    };
    if let Some(journal) = args.journal {
        config.journal_path = Some(journal);
    }

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let registry = Registry::default();
    let engine = match Engine::with_config(config, registry.users.clone(), registry.orders.clone())
    {
        Ok(engine) => engine.with_audit(AuditNotifier::spawn_logger()),
        Err(e) => {
            eprintln!("Error opening ledger: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = process_commands(&engine, &registry, BufReader::new(file)) {
        eprintln!("Error processing commands: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_wallets(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Collaborators the CSV can populate.
#[derive(Default)]
struct Registry {
    users: Arc<InMemoryUsers>,
    orders: Arc<InMemoryOrders>,
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, reference, amount, detail`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    command: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    user: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    reference: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    RegisterUser(UserId),
    RegisterOrder { order_id: OrderId, amount: Decimal },
    Recharge { user_id: UserId, amount: Decimal, method: PaymentMethod },
    OrderPayment { user_id: UserId, order_id: Option<OrderId>, amount: Decimal, method: PaymentMethod },
    Settle { payment_id: PaymentId, transaction_id: String },
    Fail { payment_id: PaymentId, reason: String },
    Refund { payment_id: PaymentId, amount: Decimal },
    Withdraw { user_id: UserId, amount: Decimal },
    Freeze { user_id: UserId, amount: Decimal },
    Unfreeze { user_id: UserId, amount: Decimal },
    Earn { user_id: UserId, amount: Decimal },
    Income { user_id: UserId, amount: Decimal },
}

impl CsvRecord {
    /// Converts a CSV record to a command.
    ///
    /// Returns `None` for unknown command types or missing required fields.
    fn into_command(self) -> Option<Command> {
        let user_id = self.user.map(UserId);
        let detail = self.detail.filter(|d| !d.is_empty());
        let method = detail
            .as_deref()
            .and_then(|d| d.parse::<PaymentMethod>().ok());

        let command = match self.command.to_lowercase().as_str() {
            "user" => Command::RegisterUser(user_id?),
            "order" => Command::RegisterOrder {
                order_id: OrderId(self.reference?),
                amount: self.amount?,
            },
            "recharge" => Command::Recharge {
                user_id: user_id?,
                amount: self.amount?,
                method: method?,
            },
            "order_payment" => Command::OrderPayment {
                user_id: user_id?,
                order_id: self.reference.map(OrderId),
                amount: self.amount?,
                method: method?,
            },
            "settle" => Command::Settle {
                payment_id: PaymentId(self.reference?),
                transaction_id: detail?,
            },
            "fail" => Command::Fail {
                payment_id: PaymentId(self.reference?),
                reason: detail.unwrap_or_else(|| "failed".to_owned()),
            },
            "refund" => Command::Refund {
                payment_id: PaymentId(self.reference?),
                amount: self.amount?,
            },
            "withdraw" => Command::Withdraw {
                user_id: user_id?,
                amount: self.amount?,
            },
            "freeze" => Command::Freeze {
                user_id: user_id?,
                amount: self.amount?,
            },
            "unfreeze" => Command::Unfreeze {
                user_id: user_id?,
                amount: self.amount?,
            },
            "earn" => Command::Earn {
                user_id: user_id?,
                amount: self.amount?,
            },
            "income" => Command::Income {
                user_id: user_id?,
                amount: self.amount?,
            },
            _ => return None,
        };
        Some(command)
    }
}

fn apply(engine: &Engine, registry: &Registry, command: Command) -> Result<(), LedgerError> {
    match command {
        Command::RegisterUser(user_id) => {
            registry.users.register(user_id);
        }
        Command::RegisterOrder { order_id, amount } => {
            registry.orders.insert(
                order_id,
                OrderInfo {
                    amount,
                    status: OrderStatus::Pending,
                },
            );
        }
        Command::Recharge { user_id, amount, method } => {
            engine.create_recharge_intent(user_id, amount, method)?;
        }
        Command::OrderPayment { user_id, order_id, amount, method } => {
            engine.create_order_payment_intent(user_id, order_id, amount, method)?;
        }
        Command::Settle { payment_id, transaction_id } => {
            engine.process_payment_outcome(payment_id, &transaction_id)?;
        }
        Command::Fail { payment_id, reason } => {
            engine.fail_payment(payment_id, &reason)?;
        }
        Command::Refund { payment_id, amount } => {
            engine.refund(payment_id, amount)?;
        }
        Command::Withdraw { user_id, amount } => {
            engine.request_withdrawal(user_id, amount)?;
        }
        Command::Freeze { user_id, amount } => {
            engine.freeze_balance(user_id, amount)?;
        }
        Command::Unfreeze { user_id, amount } => {
            engine.unfreeze_balance(user_id, amount)?;
        }
        Command::Earn { user_id, amount } => {
            engine.settle_frozen(user_id, amount)?;
        }
        Command::Income { user_id, amount } => {
            engine.credit_income(user_id, amount)?;
        }
    }
    Ok(())
}

/// Applies commands from a CSV reader.
///
/// Rows are streamed, so the file can be arbitrarily large. Malformed rows
/// and rejected commands are logged at debug level and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, user, reference, amount, detail`
/// - `type`: user, order, recharge, order_payment, settle, fail, refund,
///   withdraw, freeze, unfreeze, earn, income
/// - `user`: User ID (u64)
/// - `reference`: Payment ID for settle/fail/refund, order ID for order/order_payment
/// - `amount`: Decimal amount
/// - `detail`: Payment method, external transaction ID or failure reason
///
/// # Example
///
/// ```csv
/// type,user,reference,amount,detail
/// user,1,,,
/// recharge,1,,100.00,alipay
/// settle,,1,,abc1234567
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
fn process_commands<R: Read>(
    engine: &Engine,
    registry: &Registry,
    reader: R,
) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(line, error = %e, "Skipping malformed row");
                continue;
            }
        };
        let Some(command) = record.into_command() else {
            tracing::debug!(line, "Skipping invalid command record");
            continue;
        };
        if let Err(e) = apply(engine, registry, command) {
            tracing::debug!(line, error = %e, transient = e.is_transient(), "Command rejected");
        }
    }

    Ok(())
}

/// Writes wallet states to a CSV writer, ordered by user.
///
/// # CSV Format
///
/// Columns: `user, balance, frozen, total, total_recharge, total_withdraw, total_income`
///
/// ```csv
/// user,balance,frozen,total,total_recharge,total_withdraw,total_income
/// 1,75.50,0.00,75.50,100.00,24.50,0.00
/// ```
fn write_wallets<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet in engine.ledger().wallets() {
        wtr.serialize(&*wallet)?;
    }
    wtr.flush()?;
    Ok(())
}
