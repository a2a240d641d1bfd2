use std::fmt::{self, Display, Formatter};
use std::io::{Error, Write};
use std::path::Path;

use crate::{EGraph, ENode, Id};

/**
A wrapper for an [`EGraph`] that can output [GraphViz] for visualization.

Every eclass becomes a dotted cluster of its enodes; every child edge runs
from an enode to the cluster of the child class. Make one with
[`EGraph::dot`].

```
use tensor_eqsat::*;
let expr: RecExpr = "(add x (neg x))".parse().unwrap();
let (egraph, _) = EGraph::from_exprs([&expr]);
let dot = egraph.dot().to_string();
assert!(dot.starts_with("digraph egraph {"));
assert!(dot.contains("cluster_0"));
```

[GraphViz]: https://graphviz.gitlab.io/
**/
pub struct Dot<'a> {
    egraph: &'a EGraph,
}

impl<'a> Dot<'a> {
    pub(crate) fn new(egraph: &'a EGraph) -> Self {
        Dot { egraph }
    }

    /// Writes the `dot` source to a file.
    pub fn to_dot(&self, filename: impl AsRef<Path>) -> Result<(), Error> {
        let mut file = std::fs::File::create(filename)?;
        write!(file, "{}", self)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Display for Dot<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph egraph {{")?;

        // set compound=true to enable edges to clusters
        writeln!(f, "  compound=true")?;
        writeln!(f, "  clusterrank=local")?;

        // define all the nodes, clustered by eclass
        for class in self.egraph.classes() {
            writeln!(f, "  subgraph cluster_{} {{", class.id)?;
            writeln!(f, "    style=dotted")?;
            if let Some(ty) = class.ty() {
                writeln!(f, "    label=\"{}\"", ty)?;
            }
            for (i, node) in class.iter().enumerate() {
                writeln!(f, "    {}.{}[label = \"{}\"]", class.id, i, escape(&node.to_string()))?;
            }
            writeln!(f, "  }}")?;
        }

        for class in self.egraph.classes() {
            for (i_in_class, node) in class.iter().enumerate() {
                for (arg_i, &child) in node.children().iter().enumerate() {
                    // write the edge to the child, but clip it to the eclass with lhead
                    let child_leader = self.egraph.find(child);
                    if child_leader == class.id {
                        writeln!(
                            f,
                            "  {}.{}:n -> {}.{}:n [label = {}]",
                            class.id, i_in_class, class.id, i_in_class, arg_i
                        )?;
                    } else {
                        writeln!(
                            f,
                            // {}.0 to pick an arbitrary node in the cluster
                            "  {}.{} -> {}.0 [lhead = cluster_{}, label = {}]",
                            class.id, i_in_class, child_leader, child_leader, arg_i
                        )?;
                    }
                }
            }
        }

        write!(f, "}}")
    }
}

/// A plain node/edge listing of an [`EGraph`], for tools that would
/// rather not parse GraphViz. Made by [`EGraph::graph_dump`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct GraphDump {
    /// Every enode with the class it belongs to.
    pub nodes: Vec<DumpNode>,
    /// Every child edge, from a node to the child's canonical class.
    pub edges: Vec<DumpEdge>,
}

/// One enode of a [`GraphDump`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DumpNode {
    /// The class holding this node.
    pub eclass: Id,
    /// The node's head, `op@params`.
    pub label: String,
    /// The class's type, if known.
    pub ty: Option<String>,
}

/// One child edge of a [`GraphDump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DumpEdge {
    /// Index of the parent node in [`GraphDump::nodes`].
    pub node: usize,
    /// Operand position.
    pub operand: usize,
    /// The child class.
    pub eclass: Id,
}

impl GraphDump {
    pub(crate) fn new(egraph: &EGraph) -> Self {
        let mut dump = GraphDump::default();
        for class in egraph.classes() {
            let ty = class.ty().map(|t| t.to_string());
            for node in class.iter() {
                dump.push(egraph, class.id, node, ty.clone());
            }
        }
        dump
    }

    fn push(&mut self, egraph: &EGraph, eclass: Id, node: &ENode, ty: Option<String>) {
        let index = self.nodes.len();
        self.nodes.push(DumpNode {
            eclass,
            label: node.to_string(),
            ty,
        });
        for (operand, &child) in node.children().iter().enumerate() {
            self.edges.push(DumpEdge {
                node: index,
                operand,
                eclass: egraph.find(child),
            });
        }
    }
}

impl EGraph {
    /// Creates a [`Dot`] to visualize this egraph. See [`Dot`].
    pub fn dot(&self) -> Dot<'_> {
        Dot::new(self)
    }

    /// Lists every node and child edge of this egraph.
    pub fn graph_dump(&self) -> GraphDump {
        GraphDump::new(self)
    }
}
