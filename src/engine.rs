use daggy::petgraph::{
    stable_graph::{EdgeIndex, NodeIndex, StableDiGraph},
    visit::EdgeRef,
    Direction,
};
use num_traits::Float;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::{collections::HashMap, fmt, fs::File, io::Write, path::Path};
use tracing::{debug, info, trace};

use crate::cast;
use crate::config::NetworkConfig;
use crate::connection::Connection;
use crate::error::{NetworkError, Result};
use crate::nn::{Unit, UnitSpec};
use crate::observer::{Change, Field, FieldValue, Observer, ObserverId, Subject};

pub type UnitId = NodeIndex;
pub type ConnectionId = EdgeIndex;

/// Starting weight of a new edge.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightInit<T> {
    /// Drawn from a standard normal.
    Random,
    Value(T),
    /// Reuse a connection detached from elsewhere, state and all.
    Existing(Connection<T>),
}

type Snapshot<T> = Vec<(Subject, Vec<(Field, FieldValue<T>)>)>;

/// Owns every unit (as graph nodes) and every connection (as graph edges).
/// Self-loops are ordinary edges, so the graph may be cyclic.
pub struct Network<T>
where
    T: Float + fmt::Display,
{
    graph: StableDiGraph<Unit<T>, Connection<T>>,
    config: NetworkConfig<T>,
    rng: StdRng,
    observers: Vec<(ObserverId, Box<dyn Observer<T>>)>,
    next_observer: usize,
}

impl<T> Network<T>
where
    T: Float + fmt::Display,
{
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    pub fn with_config(config: NetworkConfig<T>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            graph: StableDiGraph::default(),
            config,
            rng,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn config(&self) -> &NetworkConfig<T> {
        &self.config
    }

    pub fn unit(&self, id: UnitId) -> Result<&Unit<T>> {
        self.graph
            .node_weight(id)
            .ok_or(NetworkError::UnknownUnit(id.index()))
    }

    fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit<T>> {
        self.graph
            .node_weight_mut(id)
            .ok_or(NetworkError::UnknownUnit(id.index()))
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&Connection<T>> {
        self.graph
            .edge_weight(id)
            .ok_or(NetworkError::UnknownConnection(id.index()))
    }

    /// Direct access for tuning. Changes made here are not reported to observers.
    pub fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection<T>> {
        self.graph
            .edge_weight_mut(id)
            .ok_or(NetworkError::UnknownConnection(id.index()))
    }

    pub fn units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.graph.node_indices()
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.graph.edge_indices()
    }

    pub fn unit_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// `(source, destination)` of a connection.
    pub fn endpoints(&self, id: ConnectionId) -> Result<(UnitId, UnitId)> {
        self.graph
            .edge_endpoints(id)
            .ok_or(NetworkError::UnknownConnection(id.index()))
    }

    /// Destinations in edge-creation order, index-aligned with `Unit::weights`.
    pub fn outputs(&self, id: UnitId) -> Result<Vec<UnitId>> {
        self.unit(id)?
            .weights
            .iter()
            .map(|&edge| self.endpoints(edge).map(|(_, to)| to))
            .collect()
    }

    fn incoming(&self, id: UnitId) -> Result<Vec<(UnitId, ConnectionId)>> {
        self.unit(id)?;
        let mut incoming: Vec<_> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|edge| (edge.source(), edge.id()))
            .collect();
        incoming.sort_by_key(|&(_, edge)| edge);
        Ok(incoming)
    }

    /// Units sending into `id`, parallel to `incoming_weights`.
    pub fn incoming_units(&self, id: UnitId) -> Result<Vec<UnitId>> {
        Ok(self.incoming(id)?.into_iter().map(|(unit, _)| unit).collect())
    }

    pub fn incoming_weights(&self, id: UnitId) -> Result<Vec<ConnectionId>> {
        Ok(self.incoming(id)?.into_iter().map(|(_, edge)| edge).collect())
    }

    pub fn subscribe<O>(&mut self, observer: O) -> ObserverId
    where
        O: Observer<T> + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    fn fields(&self, subject: Subject) -> Option<Vec<(Field, FieldValue<T>)>> {
        match subject {
            Subject::Unit(id) => {
                let unit = self.graph.node_weight(id)?;
                Some(
                    Field::UNIT
                        .iter()
                        .filter_map(|&field| unit.read(field).map(|value| (field, value)))
                        .collect(),
                )
            }
            Subject::Connection(id) => {
                let connection = self.graph.edge_weight(id)?;
                Some(
                    Field::CONNECTION
                        .iter()
                        .filter_map(|&field| connection.read(field).map(|value| (field, value)))
                        .collect(),
                )
            }
        }
    }

    // Each root, its outgoing connections and their destinations.
    fn snapshot(&self, roots: &[UnitId]) -> Snapshot<T> {
        let mut subjects = Vec::new();
        let mut push = |subject: Subject| {
            if !subjects.contains(&subject) {
                subjects.push(subject);
            }
        };
        for &root in roots {
            let Some(unit) = self.graph.node_weight(root) else {
                continue;
            };
            push(Subject::Unit(root));
            for &edge in &unit.weights {
                push(Subject::Connection(edge));
                if let Some((_, to)) = self.graph.edge_endpoints(edge) {
                    push(Subject::Unit(to));
                }
            }
        }
        subjects
            .into_iter()
            .filter_map(|subject| self.fields(subject).map(|fields| (subject, fields)))
            .collect()
    }

    /// Runs `op` and reports every field it changed around `roots`.
    fn tracked<R>(
        &mut self,
        roots: &[UnitId],
        op: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        if self.observers.is_empty() {
            return op(self);
        }
        let before: HashMap<_, _> = self.snapshot(roots).into_iter().collect();
        let result = op(self);

        let mut changes = Vec::new();
        for (subject, fields) in self.snapshot(roots) {
            let previous = before.get(&subject);
            for (field, value) in fields {
                let unchanged = previous.is_some_and(|previous| {
                    previous
                        .iter()
                        .any(|&(old_field, old)| old_field == field && old == value)
                });
                if !unchanged {
                    changes.push(Change {
                        subject,
                        field,
                        value,
                    });
                }
            }
        }
        for change in &changes {
            for (_, observer) in self.observers.iter_mut() {
                observer.on_change(change);
            }
        }
        result
    }

    pub fn add_unit(&mut self, spec: UnitSpec<T>) -> Result<UnitId> {
        for (i, &to) in spec.outputs.iter().enumerate() {
            self.unit(to)?;
            if spec.outputs[..i].contains(&to) {
                return Err(NetworkError::DuplicateOutput {
                    from: self.graph.node_count(),
                    to: to.index(),
                });
            }
        }

        let id = self.graph.add_node(Unit::from_spec(&spec));
        debug!(
            unit = id.index(),
            label = spec.label.as_str(),
            nonlinearity = spec.nonlinearity.name(),
            "added unit"
        );
        for &to in &spec.outputs {
            self.add_output(id, to, WeightInit::Random)?;
        }
        if spec.recurrent {
            self.add_output(id, id, WeightInit::Random)?;
        }
        Ok(id)
    }

    /// Connects `from` to `to`. A unit sends to a given destination at most once.
    pub fn add_output(
        &mut self,
        from: UnitId,
        to: UnitId,
        weight: WeightInit<T>,
    ) -> Result<ConnectionId> {
        self.tracked(&[from, to], |net| net.connect(from, to, weight))
    }

    fn connect(&mut self, from: UnitId, to: UnitId, weight: WeightInit<T>) -> Result<ConnectionId> {
        self.unit(to)?;
        if self.outputs(from)?.contains(&to) {
            return Err(NetworkError::DuplicateOutput {
                from: from.index(),
                to: to.index(),
            });
        }

        let connection = match weight {
            WeightInit::Random => {
                let value: f64 = self.rng.sample(StandardNormal);
                Connection::new(cast(value), &self.config.connection)
            }
            WeightInit::Value(value) => Connection::new(value, &self.config.connection),
            WeightInit::Existing(connection) => connection,
        };
        let value = connection.value();
        let edge = self.graph.add_edge(from, to, connection);

        let unit = self.unit_mut(from)?;
        unit.weights.push(edge);
        if from == to {
            unit.recurrent = true;
        }
        debug!(
            from = from.index(),
            to = to.index(),
            connection = edge.index(),
            "connected with weight {:.4}",
            value
        );
        Ok(edge)
    }

    /// Drops one outgoing connection of `from` and hands it back. Not an
    /// outgoing connection of `from`: nothing happens.
    pub fn remove_outgoing_weight(
        &mut self,
        from: UnitId,
        weight: ConnectionId,
    ) -> Result<Option<Connection<T>>> {
        self.tracked(&[from], |net| net.disconnect(from, weight))
    }

    fn disconnect(&mut self, from: UnitId, weight: ConnectionId) -> Result<Option<Connection<T>>> {
        let unit = self.unit_mut(from)?;
        let Some(position) = unit.weights.iter().position(|&edge| edge == weight) else {
            return Ok(None);
        };
        unit.weights.remove(position);

        let to = self.graph.edge_endpoints(weight).map(|(_, to)| to);
        let connection = self.graph.remove_edge(weight);
        if to == Some(from) {
            self.unit_mut(from)?.recurrent = false;
        }
        debug!(
            from = from.index(),
            connection = weight.index(),
            "disconnected"
        );
        Ok(connection)
    }

    /// Drops the connection from `from` to `to`, if there is one.
    pub fn remove_output(&mut self, from: UnitId, to: UnitId) -> Result<Option<Connection<T>>> {
        let edge = self
            .unit(from)?
            .weights
            .iter()
            .copied()
            .find(|&edge| self.graph.edge_endpoints(edge).map(|(_, dest)| dest) == Some(to));
        match edge {
            Some(edge) => self.remove_outgoing_weight(from, edge),
            None => Ok(None),
        }
    }

    /// Tears down every edge touching `id`, then the unit itself.
    pub fn remove_unit(&mut self, id: UnitId) -> Result<Unit<T>> {
        for (source, edge) in self.incoming(id)? {
            self.remove_outgoing_weight(source, edge)?;
        }
        let outgoing = self.unit(id)?.weights.clone();
        for edge in outgoing {
            self.remove_outgoing_weight(id, edge)?;
        }
        let unit = self
            .graph
            .remove_node(id)
            .ok_or(NetworkError::UnknownUnit(id.index()))?;
        debug!(unit = id.index(), "removed unit");
        Ok(unit)
    }

    /// Adds or drops the self-loop. Asking for the current state is a no-op.
    pub fn set_recurrent(&mut self, id: UnitId, recurrent: bool) -> Result<()> {
        self.tracked(&[id], |net| {
            let self_loop = net
                .unit(id)?
                .weights
                .iter()
                .copied()
                .find(|&edge| net.graph.edge_endpoints(edge) == Some((id, id)));
            match (recurrent, self_loop) {
                (true, None) => net.connect(id, id, WeightInit::Random).map(|_| ()),
                (false, Some(edge)) => net.disconnect(id, edge).map(|_| ()),
                _ => Ok(()),
            }
        })
    }

    pub fn receive(&mut self, id: UnitId, data: T) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.receive(data);
            Ok(())
        })
    }

    /// Sets an input unit's logit, replacing whatever had accumulated.
    pub fn update(&mut self, id: UnitId, value: T) -> Result<()> {
        self.tracked(&[id], |net| {
            let unit = net.unit_mut(id)?;
            if !unit.is_input() {
                return Err(NetworkError::NotAnInput(id.index()));
            }
            unit.set_logit(value);
            Ok(())
        })
    }

    pub fn forward(&mut self, id: UnitId) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.forward();
            Ok(())
        })
    }

    /// Delivers the current output along one outgoing connection (by position)
    /// or, with `None`, along all of them.
    pub fn send(&mut self, id: UnitId, target: Option<usize>) -> Result<()> {
        self.tracked(&[id], |net| net.deliver(id, target))
    }

    fn deliver(&mut self, id: UnitId, target: Option<usize>) -> Result<()> {
        let unit = self.unit(id)?;
        let output = unit.output();
        let edges = match target {
            Some(index) => {
                let edge = unit
                    .weights
                    .get(index)
                    .copied()
                    .ok_or(NetworkError::OutputIndex {
                        unit: id.index(),
                        index,
                        len: unit.weights.len(),
                    })?;
                vec![edge]
            }
            None => unit.weights.clone(),
        };
        for edge in edges {
            let (_, to) = self.endpoints(edge)?;
            let signal = &self.graph[edge] * output;
            self.unit_mut(to)?.receive(signal);
        }
        Ok(())
    }

    /// One forward step: activate, then send.
    pub fn go(&mut self, id: UnitId) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.forward();
            net.deliver(id, None)
        })?;
        trace!(unit = id.index(), "stepped forward");
        Ok(())
    }

    pub fn freeze(&mut self, id: UnitId) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.freeze();
            Ok(())
        })
    }

    pub fn thaw(&mut self, id: UnitId) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.thaw();
            Ok(())
        })
    }

    pub fn reset(&mut self, id: UnitId) -> Result<()> {
        self.tracked(&[id], |net| {
            net.unit_mut(id)?.reset();
            Ok(())
        })
    }

    /// Pulls deltas back from the destinations of `id` and feeds each outgoing
    /// connection its gradient. Consumes one forward step of history.
    pub fn backprop(&mut self, id: UnitId, commit: bool) -> Result<()> {
        self.tracked(&[id], |net| net.propagate_back(id, commit))?;
        trace!(unit = id.index(), commit, "stepped back");
        Ok(())
    }

    fn propagate_back(&mut self, id: UnitId, commit: bool) -> Result<()> {
        let (activation, derivative) = self.unit_mut(id)?.pop_state(id)?;
        let options = self.config.update.with_commit(commit);
        let edges = self.unit(id)?.weights.clone();

        let mut delta = T::zero();
        for edge in edges {
            let (_, to) = self.endpoints(edge)?;
            let downstream = self.unit(to)?.delta;
            let connection = self.connection_mut(edge)?;
            delta = delta + connection.value() * downstream;
            connection.update(downstream * activation, options);
        }
        self.unit_mut(id)?.seed(delta, derivative);
        Ok(())
    }

    /// Scores the latest activation of an output unit against `target` and
    /// seeds its delta. Returns the cost.
    pub fn cost(&mut self, id: UnitId, target: T) -> Result<T> {
        self.tracked(&[id], |net| {
            let unit = net.unit(id)?;
            let cost_function = unit
                .cost_function()
                .ok_or(NetworkError::NotAnOutput(id.index()))?;
            let has_outputs = !unit.weights.is_empty();

            let (output, derivative) = net.unit_mut(id)?.pop_state(id)?;
            if has_outputs {
                // Monitoring taps still get their gradient from the same step.
                net.unit_mut(id)?.push_state(output, derivative);
                net.propagate_back(id, true)?;
            }

            let cost_val = cost_function.cost(output, target);
            let unit = net.unit_mut(id)?;
            unit.seed(cost_function.derivative(output, target), derivative);
            unit.record_cost(target, cost_val);
            Ok(cost_val)
        })
    }

    /// Seeds backprop on any unit: pops its latest step and sets
    /// `outdelta = error(output)`. Returns that gradient.
    pub fn inject_error(&mut self, id: UnitId, error: impl FnOnce(T) -> T) -> Result<T> {
        self.tracked(&[id], |net| {
            let unit = net.unit_mut(id)?;
            let (output, derivative) = unit.pop_state(id)?;
            let outdelta = error(output);
            unit.seed(outdelta, derivative);
            Ok(outdelta)
        })
    }

    pub fn commit(&mut self, id: ConnectionId) -> Result<()> {
        let (from, _) = self.endpoints(id)?;
        self.tracked(&[from], |net| {
            net.connection_mut(id)?.commit();
            Ok(())
        })
    }

    pub fn nesterov(&mut self, id: ConnectionId) -> Result<()> {
        let (from, _) = self.endpoints(id)?;
        self.tracked(&[from], |net| {
            net.connection_mut(id)?.nesterov();
            Ok(())
        })
    }

    pub fn read(&self, subject: Subject, field: Field) -> Result<FieldValue<T>> {
        let value = match subject {
            Subject::Unit(id) => self.unit(id)?.read(field),
            Subject::Connection(id) => self.connection(id)?.read(field),
        };
        value.ok_or(NetworkError::UnsupportedField(field))
    }

    pub fn write(&mut self, subject: Subject, field: Field, value: FieldValue<T>) -> Result<()> {
        match subject {
            Subject::Unit(id) if field == Field::Recurrent => {
                let recurrent = value.flag().ok_or(NetworkError::FieldType(field))?;
                self.set_recurrent(id, recurrent)
            }
            Subject::Unit(id) => {
                self.tracked(&[id], |net| net.unit_mut(id)?.write(field, value))
            }
            Subject::Connection(id) => {
                let (from, _) = self.endpoints(id)?;
                self.tracked(&[from], |net| net.connection_mut(id)?.write(field, value))
            }
        }
    }

    /// Graphviz rendering: units show their output and delta, edges their weight.
    pub fn to_dot(&self) -> String {
        let mut content = String::new();

        content.push_str("digraph {\n");
        content.push_str(r#"    rankdir="LR""#);
        content.push_str("\n    node [shape=record]");

        for id in self.graph.node_indices() {
            let unit = &self.graph[id];
            let label = match unit.label() {
                "" => format!("u{}", id.index()),
                label => label.to_string(),
            };
            content.push('\n');
            content.push_str(&format!(
                r#"    {} [label="{{ {} | {} | out: {:.4} | delta: {:.4} }}"]"#,
                id.index(),
                label,
                unit.nonlinearity().name(),
                unit.output(),
                unit.delta()
            ));
        }

        content.push('\n');
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                content.push_str(&format!(
                    "\n    {} -> {} [label=\"{:.4}\"]",
                    from.index(),
                    to.index(),
                    self.graph[edge].value()
                ));
            }
        }
        content.push_str("\n}\n");
        content
    }

    pub fn write_dot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        file.write_all(self.to_dot().as_bytes())?;
        info!("wrote graph to {}", path.display());
        Ok(())
    }
}

impl<T> Default for Network<T>
where
    T: Float + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonlinearity::Nonlinearity;

    fn linear() -> UnitSpec<f64> {
        UnitSpec::hidden().nonlinearity(Nonlinearity::Linear)
    }

    #[test]
    fn seeded_networks_draw_the_same_weights() {
        let build = || {
            let mut net = Network::<f64>::with_config(NetworkConfig::seeded(7));
            let a = net.add_unit(linear()).unwrap();
            let b = net.add_unit(linear().outputs([a])).unwrap();
            net.connection(net.unit(b).unwrap().weights()[0])
                .unwrap()
                .value()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn send_to_one_position() {
        let mut net = Network::<f64>::new();
        let a = net.add_unit(linear()).unwrap();
        let b = net.add_unit(linear()).unwrap();
        let src = net.add_unit(UnitSpec::input()).unwrap();
        net.add_output(src, a, WeightInit::Value(1.0)).unwrap();
        net.add_output(src, b, WeightInit::Value(2.0)).unwrap();

        net.update(src, 3.0).unwrap();
        net.forward(src).unwrap();
        net.send(src, Some(1)).unwrap();
        assert_eq!(net.unit(a).unwrap().logit(), 0.0);
        assert_eq!(net.unit(b).unwrap().logit(), 6.0);

        net.send(src, Some(0)).unwrap();
        assert_eq!(net.unit(a).unwrap().logit(), 3.0);

        assert!(matches!(
            net.send(src, Some(2)),
            Err(NetworkError::OutputIndex { index: 2, len: 2, .. })
        ));
    }

    #[test]
    fn duplicate_edges_are_rejected() {
        let mut net = Network::<f64>::new();
        let a = net.add_unit(linear()).unwrap();
        let b = net.add_unit(linear()).unwrap();
        net.add_output(a, b, WeightInit::Random).unwrap();
        assert!(matches!(
            net.add_output(a, b, WeightInit::Random),
            Err(NetworkError::DuplicateOutput { .. })
        ));
        assert_eq!(net.outputs(a).unwrap(), vec![b]);
    }

    #[test]
    fn recurrent_toggle() {
        let mut net = Network::<f64>::new();
        let a = net.add_unit(linear().recurrent(true)).unwrap();
        assert!(net.unit(a).unwrap().recurrent());
        assert_eq!(net.outputs(a).unwrap(), vec![a]);

        net.set_recurrent(a, true).unwrap();
        assert_eq!(net.connection_count(), 1);

        net.set_recurrent(a, false).unwrap();
        assert!(!net.unit(a).unwrap().recurrent());
        assert_eq!(net.connection_count(), 0);
    }

    #[test]
    fn detached_connection_can_be_reused() {
        let mut net = Network::<f64>::new();
        let a = net.add_unit(linear()).unwrap();
        let b = net.add_unit(linear()).unwrap();
        let c = net.add_unit(linear()).unwrap();
        net.add_output(a, b, WeightInit::Value(0.75)).unwrap();

        let connection = net.remove_output(a, b).unwrap().unwrap();
        let edge = net
            .add_output(a, c, WeightInit::Existing(connection))
            .unwrap();
        assert_eq!(net.connection(edge).unwrap().value(), 0.75);
    }

    #[test]
    fn dot_lists_units_and_weights() {
        let mut net = Network::<f64>::new();
        let out = net.add_unit(UnitSpec::output().label("out")).unwrap();
        let inp = net.add_unit(UnitSpec::input()).unwrap();
        net.add_output(inp, out, WeightInit::Value(0.5)).unwrap();

        let dot = net.to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("out | sigmoid"));
        assert!(dot.contains("u1 | linear"));
        assert!(dot.contains(r#"1 -> 0 [label="0.5000"]"#));
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut net = Network::<f64>::new();
        let ghost = UnitId::new(9);
        assert!(matches!(net.go(ghost), Err(NetworkError::UnknownUnit(9))));
        assert!(matches!(
            net.commit(ConnectionId::new(4)),
            Err(NetworkError::UnknownConnection(4))
        ));
    }
}
