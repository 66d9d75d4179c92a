// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Target profile commands
//!
//! Commands: show, eval

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use dispers_core::domain::operation_tree::{AddressSets, OperationTree};

use super::read_json;

#[derive(Subcommand)]
pub enum TreeCommand {
    /// Parse a target profile and print it
    Show {
        /// Operation tree (JSON string or @file.json)
        #[arg(value_name = "TREE")]
        tree: String,
    },

    /// Evaluate a target profile against named address sets
    Eval {
        /// Operation tree (JSON string or @file.json)
        #[arg(short, long, value_name = "TREE")]
        tree: String,

        /// Object mapping concept names to address lists (JSON string or @file.json)
        #[arg(short, long, value_name = "SETS")]
        sets: String,
    },
}

pub async fn handle_command(command: TreeCommand) -> Result<()> {
    match command {
        TreeCommand::Show { tree } => {
            let tree = parse_tree(&tree)?;
            println!("{}", tree.to_string().bold());
            println!("  Leaves: {}", tree.leaves().join(", "));
            println!("  Depth: {}", tree.depth());
            Ok(())
        }
        TreeCommand::Eval { tree, sets } => {
            let targets = evaluate(&tree, &sets)?;
            println!("{}", format!("✓ {} target(s)", targets.len()).green());
            for target in targets {
                println!("  {}", target);
            }
            Ok(())
        }
    }
}

fn parse_tree(raw: &str) -> Result<OperationTree> {
    let value = read_json(raw)?;
    OperationTree::decode(&value).context("Invalid operation tree")
}

fn evaluate(tree: &str, sets: &str) -> Result<Vec<String>> {
    let tree = parse_tree(tree)?;
    let sets: AddressSets =
        serde_json::from_value(read_json(sets)?).context("Address sets must map names to string lists")?;
    Ok(tree.evaluate(&sets)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{"type":1,"left_node":{"type":0,"value":"A"},"right_node":{"type":2,"left_node":{"type":0,"value":"B"},"right_node":{"type":0,"value":"C"}}}"#;

    #[test]
    fn test_evaluate_profile() {
        let sets = r#"{"A":["x","y"],"B":["y","z"],"C":["z","w"]}"#;
        assert_eq!(evaluate(PROFILE, sets).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_evaluate_reports_missing_leaf() {
        let sets = r#"{"A":["x"],"B":["y"]}"#;
        let err = evaluate(PROFILE, sets).unwrap_err();
        assert!(err.to_string().contains("unknown concept: C"), "{err}");
    }

    #[test]
    fn test_tree_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");
        std::fs::write(&path, PROFILE).unwrap();
        let tree = parse_tree(&format!("@{}", path.display())).unwrap();
        assert_eq!(tree.leaves(), vec!["A", "B", "C"]);
        assert_eq!(tree.depth(), 3);
    }
}
