//! # Graphs
//!
//! A [`Graph`] is the composite a director runs: a set of uniquely named
//! actors whose ports are wired together. Dependencies between actors are not
//! stored separately; they are read back from the port connections, so an
//! edge exists wherever an output port of one actor feeds an input port of
//! another.

use crate::actor::{apply_parameter_changes, Actor};
use crate::errors::GraphError;
use crate::parameter::ParameterValue;
use crate::port::Port;
use std::collections::HashMap;
use tracing::debug;

struct Node {
    name: String,
    actor: Option<Box<dyn Actor>>,
}

pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an actor. Actor names are unique within a graph.
    pub fn add<A: Actor>(&mut self, actor: A) -> Result<(), GraphError> {
        self.add_boxed(Box::new(actor))
    }

    pub fn add_boxed(&mut self, mut actor: Box<dyn Actor>) -> Result<(), GraphError> {
        let name = actor.name().to_string();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateActor(name));
        }
        actor.core_mut().set_container(self.name.clone());
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(Node {
            name,
            actor: Some(actor),
        });
        Ok(())
    }

    fn node(&self, name: &str) -> Result<&dyn Actor, GraphError> {
        let index = self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownActor(name.to_string()))?;
        self.nodes[*index]
            .actor
            .as_deref()
            .ok_or_else(|| GraphError::ActorUnavailable(name.to_string()))
    }

    pub fn actor(&self, name: &str) -> Result<&dyn Actor, GraphError> {
        self.node(name)
    }

    pub fn actor_mut(&mut self, name: &str) -> Result<&mut (dyn Actor + 'static), GraphError> {
        let index = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownActor(name.to_string()))?;
        self.nodes[index]
            .actor
            .as_deref_mut()
            .ok_or_else(|| GraphError::ActorUnavailable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn port(&self, actor: &str, port: &str) -> Result<Port, GraphError> {
        Ok(self.node(actor)?.core().port(port)?)
    }

    /// Connects `from_actor.from_port` to `to_actor.to_port`.
    pub fn connect(
        &self,
        from_actor: &str,
        from_port: &str,
        to_actor: &str,
        to_port: &str,
    ) -> Result<(), GraphError> {
        let from = self.port(from_actor, from_port)?;
        let to = self.port(to_actor, to_port)?;
        from.connect(&to)?;
        Ok(())
    }

    /// Connects two ports given as `"<actor>.<port>"` paths.
    pub fn link(&self, from: &str, to: &str) -> Result<(), GraphError> {
        let (from_actor, from_port) = split_path(from)?;
        let (to_actor, to_port) = split_path(to)?;
        self.connect(from_actor, from_port, to_actor, to_port)
    }

    /// Sets a parameter and immediately delivers the change to the actor.
    pub fn set_parameter(
        &mut self,
        actor: &str,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<(), GraphError> {
        let target = self.actor_mut(actor)?;
        target.core_mut().parameters_mut().set(name, value)?;
        apply_parameter_changes(target)?;
        Ok(())
    }

    /// Actor names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Producer/consumer index pairs, one per connected port pair. Ports
    /// wired to actors outside this graph are ignored.
    pub(crate) fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for (from, node) in self.nodes.iter().enumerate() {
            let Some(actor) = &node.actor else { continue };
            for port in actor.core().ports().outputs() {
                for peer in port.downstream() {
                    if let Some(&to) = self.index.get(peer.owner()) {
                        edges.push((from, to));
                    }
                }
            }
        }
        edges
    }

    /// Moves every actor out of the graph for the duration of a run.
    pub(crate) fn take_actors(&mut self) -> Result<Vec<Box<dyn Actor>>, GraphError> {
        if let Some(missing) = self.nodes.iter().find(|n| n.actor.is_none()) {
            return Err(GraphError::ActorUnavailable(missing.name.clone()));
        }
        Ok(self.nodes.iter_mut().filter_map(|n| n.actor.take()).collect())
    }

    /// Puts actors taken by [`Graph::take_actors`] back in place.
    pub(crate) fn restore(&mut self, actors: Vec<Box<dyn Actor>>) {
        for actor in actors {
            match self.index.get(actor.name()) {
                Some(&index) => self.nodes[index].actor = Some(actor),
                None => debug!("Dropping actor {} not known to graph {}", actor.name(), self.name),
            }
        }
    }
}

fn split_path(path: &str) -> Result<(&str, &str), GraphError> {
    match path.split_once('.') {
        Some((actor, port)) if !actor.is_empty() && !port.is_empty() => Ok((actor, port)),
        _ => Err(GraphError::InvalidPath(path.to_string())),
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("actors", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorContext, ActorCore, ActorFuture};
    use crate::errors::PortError;
    use crate::port::PortMode;

    struct Relay {
        core: ActorCore,
    }

    impl Relay {
        fn new(name: &str) -> Self {
            let mut core = ActorCore::new(name);
            core.ports_mut().add_input("in", PortMode::Push).unwrap();
            core.ports_mut().add_output("out").unwrap();
            core.parameters_mut().declare("gain", 1i64).unwrap();
            Self { core }
        }
    }

    impl Actor for Relay {
        fn core(&self) -> &ActorCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ActorCore {
            &mut self.core
        }

        fn fire<'a>(&'a mut self, _ctx: &'a ActorContext) -> ActorFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut graph = Graph::new("g");
        graph.add(Relay::new("a")).unwrap();
        assert!(matches!(graph.add(Relay::new("a")), Err(GraphError::DuplicateActor(_))));
        assert_eq!(graph.actor("a").unwrap().core().container(), Some("g"));
    }

    #[test]
    fn test_link_builds_edges() {
        let mut graph = Graph::new("g");
        graph.add(Relay::new("a")).unwrap();
        graph.add(Relay::new("b")).unwrap();
        graph.add(Relay::new("c")).unwrap();
        graph.link("a.out", "b.in").unwrap();
        graph.connect("b", "out", "c", "in").unwrap();

        assert_eq!(graph.edges(), vec![(0, 1), (1, 2)]);
        assert!(matches!(graph.link("a", "b.in"), Err(GraphError::InvalidPath(_))));
        assert!(matches!(graph.link("a.out", "zz.in"), Err(GraphError::UnknownActor(_))));
        assert!(matches!(
            graph.link("a.nope", "b.in"),
            Err(GraphError::Port(PortError::NoSuchPort { .. }))
        ));
        assert!(matches!(
            graph.link("a.in", "b.in"),
            Err(GraphError::Port(PortError::Connection { .. }))
        ));
    }

    #[test]
    fn test_set_parameter_delivers_update() {
        let mut graph = Graph::new("g");
        graph.add(Relay::new("a")).unwrap();
        graph.set_parameter("a", "gain", 3i64).unwrap();

        let actor = graph.actor("a").unwrap();
        assert_eq!(actor.core().parameters().get_int("gain"), Some(3));
        assert!(!actor.core().parameters().has_changes());
        assert!(graph.set_parameter("a", "gain", "loud").is_err());
    }

    #[test]
    fn test_take_and_restore() {
        let mut graph = Graph::new("g");
        graph.add(Relay::new("a")).unwrap();
        graph.add(Relay::new("b")).unwrap();

        let actors = graph.take_actors().unwrap();
        assert_eq!(actors.len(), 2);
        assert!(matches!(graph.actor("a"), Err(GraphError::ActorUnavailable(_))));
        assert!(matches!(graph.take_actors(), Err(GraphError::ActorUnavailable(_))));

        graph.restore(actors);
        assert!(graph.actor("b").is_ok());
    }
}
