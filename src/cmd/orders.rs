//! Order inspection from the terminal — `packflow orders`.

use anyhow::{Context, Result};
use packflow::config::PackflowToml;
use packflow::dashboard::views::{self, OrderFilter};
use packflow::dashboard::workflow::{Actor, parse_stage};
use packflow::dashboard::Workflow;

use super::super::OrdersCommands;

pub async fn cmd_orders(settings: PackflowToml, command: OrdersCommands) -> Result<()> {
    let store = super::open_store(&settings, false)?;
    let workflow = Workflow::new(store, settings);

    match command {
        OrdersCommands::List { stage, search } => {
            let filter = OrderFilter {
                stage,
                search,
                ..OrderFilter::default()
            };
            let orders = workflow.list_orders(&filter).await?;
            if orders.is_empty() {
                println!("No orders.");
                return Ok(());
            }
            println!(
                "{:<8} {:<24} {:<10} {:<8} {:<12} {}",
                "ID", "CUSTOMER", "STAGE", "PRIORITY", "DUE", "ITEM"
            );
            for order in orders {
                println!(
                    "{:<8} {:<24} {:<10} {:<8} {:<12} {}",
                    order.order_id,
                    truncate(&order.customer, 24),
                    order.stage,
                    order.priority,
                    truncate(&order.due, 12),
                    order.item
                );
            }
        }
        OrdersCommands::Show { key } => {
            let order = workflow.order(&key).await?;
            let detail = serde_json::to_string_pretty(&views::order_detail(&order))
                .context("Failed to render order")?;
            println!("{}", detail);
        }
        OrdersCommands::Advance { key, expect } => {
            let expected = expect.as_deref().map(parse_stage).transpose()?;
            let advanced = workflow
                .advance(&Actor::system("cli"), &key, expected)
                .await?;
            println!(
                "{}: {} -> {}",
                advanced.order.order_id, advanced.from, advanced.to
            );
        }
    }
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
