//! Deterministic agent selection.

use crate::agent::Agent;
use crate::task::Task;

/// Pick exactly one agent for `task`, first match wins:
///
/// 1. `task.agent` equals an agent's `name`;
/// 2. `task.tool` equals an agent's `command`;
/// 3. the first name in `routing_order` present among `agents`;
/// 4. the first agent in registry order.
///
/// Returns `None` only when `agents` is empty. An unmatched preference falls
/// through to the next rule rather than failing the task.
pub fn select_agent<'a>(
    task: &Task,
    agents: &'a [Agent],
    routing_order: &[String],
) -> Option<&'a Agent> {
    if let Some(wanted) = task.agent.as_deref()
        && let Some(agent) = agents.iter().find(|agent| agent.name() == wanted)
    {
        return Some(agent);
    }
    if let Some(tool) = task.tool.as_deref()
        && let Some(agent) = agents.iter().find(|agent| agent.command() == tool)
    {
        return Some(agent);
    }
    for name in routing_order {
        if let Some(agent) = agents.iter().find(|agent| agent.name() == name) {
            return Some(agent);
        }
    }
    agents.first()
}
