use anyhow::{Result, bail};
use console::style;
use std::sync::Arc;

use helm_config::{HelmConfig, WarningSeverity};
use helm_core::Surface;
use helm_device::process::{run_cmd, which};
use helm_device::{DesktopConnector, TccProbe};

/// How a requirement is probed.
enum Probe {
    /// Binary on PATH.
    Binary(&'static str),
    /// Command that must exit successfully.
    Command(&'static str, &'static [&'static str]),
}

struct Requirement {
    name: &'static str,
    probe: Probe,
    fix: &'static str,
}

fn requirements(mobile: bool) -> Vec<Requirement> {
    let mut reqs = vec![
        Requirement {
            name: "Homebrew",
            probe: Probe::Binary("brew"),
            fix: "Install Homebrew: https://brew.sh",
        },
        Requirement {
            name: "cliclick",
            probe: Probe::Binary("cliclick"),
            fix: "Install cliclick: brew install cliclick",
        },
        Requirement {
            name: "Node.js",
            probe: Probe::Binary("node"),
            fix: "Install Node.js: brew install node",
        },
    ];
    if mobile {
        reqs.push(Requirement {
            name: "Appium",
            probe: Probe::Binary("appium"),
            fix: "Install Appium: npm install -g appium",
        });
        reqs.push(Requirement {
            name: "Xcode",
            probe: Probe::Command("xcode-select", &["-p"]),
            fix: "Install Xcode from the App Store",
        });
    }
    reqs
}

async fn satisfied(probe: &Probe) -> bool {
    match probe {
        Probe::Binary(program) => which(program),
        Probe::Command(program, args) => run_cmd(Surface::Mobile, program, args).await.is_ok(),
    }
}

pub(super) async fn cmd_check(config: HelmConfig) -> Result<()> {
    println!("🩺 Helm Check");
    println!();

    let mut failed = 0;
    for req in requirements(config.mobile.enabled) {
        if satisfied(&req.probe).await {
            println!("  {} {}", style("✅").green(), req.name);
        } else {
            failed += 1;
            println!("  {} {}", style("❌").red(), req.name);
            println!("     ↳ {}", req.fix);
        }
    }

    // Missing permissions don't fail the check: the desktop connector asks
    // for them on first use.
    let desktop = DesktopConnector::new(Arc::new(TccProbe)).without_prompts();
    for permission in desktop.missing_permissions().await {
        println!(
            "  {} permission not granted: {}",
            style("⚠️ ").yellow(),
            permission.as_str()
        );
    }

    println!();
    match config.validate() {
        Ok(warnings) => {
            for w in &warnings {
                println!("  {w}");
            }
            let serious = warnings
                .iter()
                .filter(|w| w.severity == WarningSeverity::Warning)
                .count();
            println!("  config: {serious} warning(s)");
        }
        Err(e) => {
            failed += 1;
            println!("  {e}");
        }
    }

    println!();
    if failed > 0 {
        bail!("{failed} check(s) failed");
    }
    println!("  {} all checks passed", style("✅").green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_adds_requirements() {
        let names = |mobile| {
            requirements(mobile)
                .into_iter()
                .map(|r| r.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(names(false), vec!["Homebrew", "cliclick", "Node.js"]);
        assert_eq!(
            names(true),
            vec!["Homebrew", "cliclick", "Node.js", "Appium", "Xcode"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_unsatisfied() {
        assert!(!satisfied(&Probe::Binary("helm-no-such-binary-xyz")).await);
    }
}
