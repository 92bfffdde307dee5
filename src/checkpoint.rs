//! Operator confirmation gate.

use crate::error::{CliError, Result};
use std::collections::BTreeSet;

/// Decides whether a gated step may run in this invocation.
///
/// Confirmations are matched by exact checkpoint name and only live for the
/// current invocation. A confirmed checkpoint covers every step bound to it.
#[derive(Debug, Clone, Default)]
pub struct CheckpointGate {
    confirmed: BTreeSet<String>,
}

impl CheckpointGate {
    /// Build the gate, rejecting confirmations for checkpoints no step declares
    pub fn new<I, S>(declared: &BTreeSet<String>, supplied: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut confirmed = BTreeSet::new();
        for name in supplied {
            let name = name.into();
            if !declared.contains(&name) {
                return Err(CliError::UnknownCheckpoint {
                    name,
                    known: declared.iter().cloned().collect(),
                }
                .into());
            }
            confirmed.insert(name);
        }
        Ok(Self { confirmed })
    }

    /// Whether the named checkpoint was confirmed
    pub fn is_satisfied(&self, checkpoint: &str) -> bool {
        self.confirmed.contains(checkpoint)
    }
}
