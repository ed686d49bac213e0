//! The instruction set a migration executes.
//!
//! One action per line, whitespace-separated tokens, double-quote quoting
//! for addresses that contain spaces or index brackets:
//!
//! ```text
//! single-state:  mv <src> <dst>
//!                rm <addr>...
//!                import <addr> <id>
//!                xmv <src-pattern> <dst-pattern>
//! multi-state:   mv <src> <dst>
//! ```
//!
//! Each action is pure with respect to its inputs: given a state (or a pair
//! of states), it yields a new state (or pair) produced by running the
//! corresponding terraform state subcommand against a scratch copy.

use anyhow::{bail, Context, Result};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::tfexec::{State, TerraformCli};

/// An instruction operating on a single state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    Mv { source: String, destination: String },
    Rm { addresses: Vec<String> },
    Import { address: String, id: String },
    /// Regex-expanded `mv`: every address matching `source` is moved to the
    /// `$n`-substitution of `destination`.
    Xmv { source: String, destination: String },
}

/// An instruction moving resources between two states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiStateAction {
    Mv { source: String, destination: String },
}

impl StateAction {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = split_tokens(line)?;
        let Some((command, args)) = tokens.split_first() else {
            bail!("empty state action");
        };

        match (command.as_str(), args) {
            ("mv", [source, destination]) => Ok(StateAction::Mv {
                source: source.clone(),
                destination: destination.clone(),
            }),
            ("mv", _) => bail!("mv action requires exactly 2 arguments: {line}"),
            ("rm", []) => bail!("rm action requires at least 1 argument: {line}"),
            ("rm", addresses) => Ok(StateAction::Rm { addresses: addresses.to_vec() }),
            ("import", [address, id]) => Ok(StateAction::Import {
                address: address.clone(),
                id: id.clone(),
            }),
            ("import", _) => bail!("import action requires exactly 2 arguments: {line}"),
            ("xmv", [source, destination]) => {
                Regex::new(source)
                    .with_context(|| format!("invalid xmv source pattern: {source}"))?;
                Ok(StateAction::Xmv {
                    source: source.clone(),
                    destination: destination.clone(),
                })
            }
            ("xmv", _) => bail!("xmv action requires exactly 2 arguments: {line}"),
            (other, _) => bail!("unknown state action: {other}"),
        }
    }

    /// Apply this action to `state`, returning the rewritten state.
    pub async fn state_update(
        &self,
        ctx: &CancellationToken,
        tf: &TerraformCli,
        state: &State,
    ) -> Result<State> {
        match self {
            StateAction::Mv { source, destination } => {
                tf.state_mv(ctx, state, source, destination).await
            }
            StateAction::Rm { addresses } => tf.state_rm(ctx, state, addresses).await,
            StateAction::Import { address, id } => tf.import(ctx, state, address, id).await,
            StateAction::Xmv { source, destination } => {
                let moves = expand_xmv(
                    source,
                    destination,
                    &tf.state_list(ctx, Some(state), &[]).await?,
                )?;
                if moves.is_empty() {
                    info!("xmv {source} matched no addresses, nothing to do");
                    return Ok(state.clone());
                }
                let mut current = state.clone();
                for (src, dst) in moves {
                    info!("xmv expansion: mv {src} {dst}");
                    let next = tf.state_mv(ctx, &current, &src, &dst).await?;
                    current = State::new(next.bytes().to_vec());
                }
                Ok(current)
            }
        }
    }
}

impl MultiStateAction {
    pub fn parse(line: &str) -> Result<Self> {
        let tokens = split_tokens(line)?;
        let Some((command, args)) = tokens.split_first() else {
            bail!("empty multi-state action");
        };

        match (command.as_str(), args) {
            ("mv", [source, destination]) => Ok(MultiStateAction::Mv {
                source: source.clone(),
                destination: destination.clone(),
            }),
            ("mv", _) => bail!("mv action requires exactly 2 arguments: {line}"),
            (other, _) => bail!("unknown multi-state action: {other}"),
        }
    }

    /// Apply this action to the `(from, to)` state pair, returning the
    /// rewritten pair.
    pub async fn multi_state_update(
        &self,
        ctx: &CancellationToken,
        from_tf: &TerraformCli,
        _to_tf: &TerraformCli,
        from_state: &State,
        to_state: &State,
    ) -> Result<(State, State)> {
        match self {
            MultiStateAction::Mv { source, destination } => {
                from_tf
                    .state_mv_between(ctx, from_state, to_state, source, destination)
                    .await
            }
        }
    }
}

/// Expand an `xmv` over the addresses currently in the state: every address
/// matching `source` yields a move to the capture substitution of
/// `destination`, in listing order.
fn expand_xmv(
    source: &str,
    destination: &str,
    addresses: &[String],
) -> Result<Vec<(String, String)>> {
    let re = Regex::new(source).with_context(|| format!("invalid xmv source pattern: {source}"))?;
    Ok(addresses
        .iter()
        .filter(|addr| re.is_match(addr))
        .map(|addr| (addr.clone(), re.replace(addr, destination).into_owned()))
        .collect())
}

/// Split an action line into tokens. Double quotes group whitespace into a
/// single token; a backslash escapes the next character inside quotes.
fn split_tokens(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '\\' if in_quotes => {
                let escaped = chars
                    .next()
                    .with_context(|| format!("trailing backslash in action: {line}"))?;
                current.push(escaped);
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        bail!("unclosed quote in action: {line}");
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mv() {
        let action = StateAction::parse("mv aws_iam_role.a aws_iam_role.b").unwrap();
        assert_eq!(
            action,
            StateAction::Mv {
                source: "aws_iam_role.a".to_string(),
                destination: "aws_iam_role.b".to_string(),
            }
        );
    }

    #[test]
    fn parse_rm_takes_multiple_addresses() {
        let action = StateAction::parse("rm aws_iam_role.a aws_iam_role.b").unwrap();
        assert_eq!(
            action,
            StateAction::Rm {
                addresses: vec!["aws_iam_role.a".to_string(), "aws_iam_role.b".to_string()],
            }
        );
        assert!(StateAction::parse("rm").is_err());
    }

    #[test]
    fn parse_import() {
        let action = StateAction::parse("import aws_iam_role.a role-name").unwrap();
        assert_eq!(
            action,
            StateAction::Import {
                address: "aws_iam_role.a".to_string(),
                id: "role-name".to_string(),
            }
        );
    }

    #[test]
    fn parse_quoted_index_addresses() {
        let action =
            StateAction::parse(r#"mv "aws_instance.example[\"foo\"]" "aws_instance.example[\"bar\"]""#)
                .unwrap();
        assert_eq!(
            action,
            StateAction::Mv {
                source: r#"aws_instance.example["foo"]"#.to_string(),
                destination: r#"aws_instance.example["bar"]"#.to_string(),
            }
        );
    }

    #[test]
    fn parse_rejects_unknown_and_malformed() {
        assert!(StateAction::parse("frobnicate a b").is_err());
        assert!(StateAction::parse("mv only_one").is_err());
        assert!(StateAction::parse("").is_err());
        assert!(StateAction::parse(r#"mv "unclosed a"#).is_err());
        assert!(StateAction::parse(r"xmv ^x([ y$1").is_err());
    }

    #[test]
    fn parse_multi_state_mv_only() {
        let action = MultiStateAction::parse("mv aws_iam_role.a aws_iam_role.a").unwrap();
        assert_eq!(
            action,
            MultiStateAction::Mv {
                source: "aws_iam_role.a".to_string(),
                destination: "aws_iam_role.a".to_string(),
            }
        );
        assert!(MultiStateAction::parse("rm aws_iam_role.a").is_err());
        assert!(MultiStateAction::parse("xmv a b").is_err());
    }

    #[test]
    fn xmv_expands_capture_groups_in_listing_order() {
        let addresses = vec![
            "aws_instance.x1".to_string(),
            "aws_instance.x2".to_string(),
            "aws_iam_role.other".to_string(),
        ];
        let moves = expand_xmv(r"^aws_instance\.x(\d+)$", "aws_instance.y$1", &addresses).unwrap();
        assert_eq!(
            moves,
            vec![
                ("aws_instance.x1".to_string(), "aws_instance.y1".to_string()),
                ("aws_instance.x2".to_string(), "aws_instance.y2".to_string()),
            ]
        );
    }

    #[test]
    fn xmv_with_no_matches_expands_to_nothing() {
        let addresses = vec!["aws_iam_role.a".to_string()];
        let moves = expand_xmv(r"^null_resource\..*$", "null_resource.b", &addresses).unwrap();
        assert!(moves.is_empty());
    }
}
