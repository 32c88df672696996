//! Swarm topology — agent identities and the ring wiring.

use muster_core::identity::AgentId;

/// Deterministic agent ids: `agent0@domain` .. `agentN-1@domain`.
pub fn agent_ids(count: u32, domain: &str) -> Vec<AgentId> {
    (0..count)
        .map(|i| AgentId::new(format!("agent{i}"), domain))
        .collect()
}

/// Ring neighbour sets: agent `i` is wired to its `degree` nearest ring
/// neighbours on each side, deduplicated and never including itself.
pub fn ring(agents: &[AgentId], degree: u32) -> Vec<Vec<AgentId>> {
    let n = agents.len();
    agents
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let mut neighbours = Vec::new();
            for d in 1..=degree as usize {
                for j in [(i + d) % n, (i + n - d % n) % n] {
                    if j != i && !neighbours.contains(&agents[j]) {
                        neighbours.push(agents[j].clone());
                    }
                }
            }
            neighbours
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_one_ring_has_two_neighbours_each() {
        let agents = agent_ids(4, "swarm");
        let ring = ring(&agents, 1);
        for (i, neighbours) in ring.iter().enumerate() {
            assert_eq!(neighbours.len(), 2, "agent {i}");
            assert!(!neighbours.contains(&agents[i]));
        }
        // agent0 touches agent1 and agent3
        assert!(ring[0].contains(&agents[1]));
        assert!(ring[0].contains(&agents[3]));
    }

    #[test]
    fn ring_is_symmetric() {
        let agents = agent_ids(5, "swarm");
        let ring = ring(&agents, 2);
        for (i, neighbours) in ring.iter().enumerate() {
            for n in neighbours {
                let j = agents.iter().position(|a| a == n).unwrap();
                assert!(ring[j].contains(&agents[i]), "{i} <-> {j}");
            }
        }
    }

    #[test]
    fn two_agents_wire_to_each_other_once() {
        let agents = agent_ids(2, "swarm");
        let ring = ring(&agents, 1);
        assert_eq!(ring[0], vec![agents[1].clone()]);
        assert_eq!(ring[1], vec![agents[0].clone()]);
    }

    #[test]
    fn oversized_degree_caps_at_everyone_else() {
        let agents = agent_ids(3, "swarm");
        let ring = ring(&agents, 5);
        for (i, neighbours) in ring.iter().enumerate() {
            assert_eq!(neighbours.len(), 2, "agent {i}");
        }
    }
}
