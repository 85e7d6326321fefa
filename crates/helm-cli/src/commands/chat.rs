use anyhow::Result;
use console::style;
use std::io::Write;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use helm_config::HelmConfig;
use helm_runtime::{ChannelObserver, ConversationEvent, Runtime};

use super::truncate_output;

pub(super) async fn cmd_chat(config: HelmConfig) -> Result<()> {
    println!("🧭 Helm Interactive Chat");
    println!("   Type 'exit' or Ctrl+D to quit");
    println!("   Type '/status' for device state, '/clear' to start over");
    println!();

    if config.services.anthropic_api_key.is_none() {
        eprintln!("⚠️  No Anthropic API key found.");
        eprintln!("   Add to [services] in helm.toml:  anthropic_api_key = \"sk-ant-...\"");
        eprintln!("   Or set env var: export ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
    }

    let mut runtime = Runtime::new(config)?;
    for (surface, ready) in runtime.initialize().await {
        let mark = if ready {
            style("ready").green()
        } else {
            style("not ready").red()
        };
        println!("   {surface}: {mark}");
    }
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", style("you>").cyan());
        std::io::stderr().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            "exit" | "quit" | "/exit" => {
                println!("👋 Goodbye!");
                break;
            }
            "/status" => {
                for (surface, state) in runtime.device_states() {
                    println!(
                        "   {surface}: {}{}",
                        state.status,
                        state.error.map(|e| format!(" ({e})")).unwrap_or_default()
                    );
                }
                continue;
            }
            "/clear" => {
                runtime.conversation_mut().clear();
                println!("   conversation cleared");
                continue;
            }
            _ => {}
        }

        let (observer, rx) = ChannelObserver::new();
        let renderer = tokio::spawn(render(rx));
        let outcome = runtime.send(trimmed, &observer).await;
        drop(observer);
        renderer.await.ok();

        if let Ok(summary) = outcome {
            eprintln!(
                "{}",
                style(format!(
                    "   [{} turn(s), {} tool call(s)]",
                    summary.turns, summary.tool_calls
                ))
                .dim()
            );
        }
        println!();
    }

    runtime.teardown().await;
    Ok(())
}

/// Print conversation events in arrival order until the observer is dropped.
async fn render(mut rx: mpsc::UnboundedReceiver<ConversationEvent>) {
    let mut in_text = false;
    while let Some(event) = rx.recv().await {
        match event {
            ConversationEvent::Content(delta) => {
                if !in_text {
                    eprint!("{} ", style("helm>").green());
                    in_text = true;
                }
                print!("{delta}");
                std::io::stdout().flush().ok();
            }
            ConversationEvent::ToolCall(call) => {
                if in_text {
                    println!();
                    in_text = false;
                }
                let action = call.action().unwrap_or("?");
                eprintln!("{}", style(format!("🔧 {} {action}", call.name)).yellow());
            }
            ConversationEvent::ToolResult { result, .. } => {
                if let Some(ref e) = result.error {
                    eprintln!("{}", style(format!("   ❌ {}", truncate_output(e, 200))).red());
                    continue;
                }
                if let Some(ref out) = result.output {
                    eprintln!("{}", style(format!("   ✓ {}", truncate_output(out, 200))).dim());
                }
                if let Some(bytes) = result.image_bytes() {
                    eprintln!("{}", style(format!("   [image: {} bytes]", bytes.len())).dim());
                }
            }
            ConversationEvent::Error(message) => {
                if in_text {
                    println!();
                    in_text = false;
                }
                println!("{}", style(format!("❌ Error: {message}")).red());
            }
        }
    }
    if in_text {
        println!();
    }
}
