use super::mesh::{Cell, Node, NodeEdge};

/// Build neighbor edges and their bordering (cell, fracture) slots from the cell list.
///
/// Existing edges are kept; their cell slots are refilled. An edge shared by more
/// than four cells keeps the first four.
pub fn assemble_adjacency(nodes: &mut [Node], cells: &[Cell]) {
    for node in nodes.iter_mut() {
        for edge in node.neighbors.iter_mut() {
            edge.cells = [None; 4];
            edge.fractures = [None; 4];
        }
    }

    for (ci, cell) in cells.iter().enumerate() {
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let (a, b) = (cell.nodes[i], cell.nodes[j]);
                let edge = edge_mut(&mut nodes[a], b);
                if let Some(slot) = edge.cells.iter().position(Option::is_none) {
                    edge.cells[slot] = Some(ci);
                    edge.fractures[slot] = Some(cell.fracture);
                }
            }
        }
    }
}

fn edge_mut(node: &mut Node, other: usize) -> &mut NodeEdge {
    let idx = match node.neighbors.iter().position(|e| e.node == other) {
        Some(idx) => idx,
        None => {
            node.neighbors.push(NodeEdge::new(other));
            node.neighbors.len() - 1
        }
    };
    &mut node.neighbors[idx]
}

/// Cells around `node` on `fracture`, in adjacency order and without repeats.
pub fn cells_around(node: &Node, fracture: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for edge in &node.neighbors {
        for c in edge.cells_on(fracture) {
            if !out.contains(&c) {
                out.push(c);
            }
        }
    }
    out
}
