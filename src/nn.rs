use num_traits::Float;
use std::fmt;

use crate::engine::{ConnectionId, Network, UnitId, WeightInit};
use crate::error::{NetworkError, Result};
use crate::nonlinearity::{CostFunction, Nonlinearity};
use crate::observer::{Field, FieldValue};

/// Boundary behaviour of a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role<T> {
    Hidden,
    /// Identity activation; its logit is set directly by `Network::update`.
    Input,
    /// Seeds backprop by comparing its activation with a target.
    Output {
        cost_function: CostFunction<T>,
        target: T,
        cost_val: T,
    },
}

/// Recipe for a unit, consumed by `Network::add_unit`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec<T> {
    pub(crate) label: String,
    pub(crate) role: Role<T>,
    pub(crate) nonlinearity: Nonlinearity<T>,
    pub(crate) dropout: T,
    pub(crate) recurrent: bool,
    pub(crate) outputs: Vec<UnitId>,
}

impl<T: Float> UnitSpec<T> {
    pub fn hidden() -> Self {
        Self {
            label: String::new(),
            role: Role::Hidden,
            nonlinearity: Nonlinearity::Sigmoid,
            dropout: T::zero(),
            recurrent: false,
            outputs: Vec::new(),
        }
    }

    pub fn input() -> Self {
        Self {
            role: Role::Input,
            nonlinearity: Nonlinearity::Linear,
            ..Self::hidden()
        }
    }

    pub fn output() -> Self {
        Self {
            role: Role::Output {
                cost_function: CostFunction::SquaredError,
                target: T::zero(),
                cost_val: T::zero(),
            },
            ..Self::hidden()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Ignored for input units, which stay linear.
    pub fn nonlinearity(mut self, nonlinearity: Nonlinearity<T>) -> Self {
        if self.role != Role::Input {
            self.nonlinearity = nonlinearity;
        }
        self
    }

    pub fn cost_function(mut self, cost: CostFunction<T>) -> Self {
        if let Role::Output { cost_function, .. } = &mut self.role {
            *cost_function = cost;
        }
        self
    }

    pub fn dropout(mut self, dropout: T) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn recurrent(mut self, recurrent: bool) -> Self {
        self.recurrent = recurrent;
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = UnitId>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }
}

/// A scalar node. Topology lives in the owning `Network`; the unit keeps the
/// ordered list of its outgoing connections plus its activation state.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit<T> {
    label: String,
    role: Role<T>,
    nonlinearity: Nonlinearity<T>,
    pub(crate) weights: Vec<ConnectionId>,
    logit: T,
    frozenlogit: T,
    frozen: bool,
    output: T,
    hidden_state: Vec<T>,
    derivative: Vec<T>,
    current_derivative: T,
    pub(crate) delta: T,
    outdelta: T,
    dropout: T,
    pub(crate) recurrent: bool,
}

impl<T> Unit<T>
where
    T: Float + fmt::Display,
{
    pub(crate) fn from_spec(spec: &UnitSpec<T>) -> Self {
        Self {
            label: spec.label.clone(),
            role: spec.role,
            nonlinearity: spec.nonlinearity,
            weights: Vec::new(),
            logit: T::zero(),
            frozenlogit: T::zero(),
            frozen: false,
            output: T::zero(),
            hidden_state: Vec::new(),
            derivative: Vec::new(),
            current_derivative: T::zero(),
            delta: T::zero(),
            outdelta: T::zero(),
            dropout: spec.dropout,
            recurrent: false,
        }
    }

    pub fn receive(&mut self, data: T) {
        if self.frozen {
            self.frozenlogit = self.frozenlogit + data;
        } else {
            self.logit = self.logit + data;
        }
    }

    /// Activates the accumulated logit and records the step for backprop.
    pub fn forward(&mut self) {
        self.output = self.nonlinearity.apply(self.logit);
        self.hidden_state.push(self.output);
        self.current_derivative = self.nonlinearity.derivative(self.output);
        self.derivative.push(self.current_derivative);
        self.logit = T::zero();
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.logit = self.frozenlogit;
        self.frozenlogit = T::zero();
        self.frozen = false;
    }

    /// Back to idle. Connections are untouched.
    pub fn reset(&mut self) {
        self.logit = T::zero();
        self.frozenlogit = T::zero();
        self.hidden_state.clear();
        self.frozen = false;
        self.outdelta = T::zero();
        self.delta = T::zero();
        self.output = T::zero();
        self.current_derivative = T::zero();
        self.derivative.clear();
    }

    /// Pops the activation and derivative of the latest unmatched forward step.
    pub(crate) fn pop_state(&mut self, id: UnitId) -> Result<(T, T)> {
        match (self.hidden_state.pop(), self.derivative.pop()) {
            (Some(output), Some(derivative)) => Ok((output, derivative)),
            (output, derivative) => {
                // Stacks only ever move together; put back whatever came off.
                self.hidden_state.extend(output);
                self.derivative.extend(derivative);
                Err(NetworkError::EmptyHistory { unit: id.index() })
            }
        }
    }

    pub(crate) fn push_state(&mut self, output: T, derivative: T) {
        self.hidden_state.push(output);
        self.derivative.push(derivative);
    }

    pub(crate) fn refresh_derivative(&mut self) {
        self.current_derivative = self.derivative.last().copied().unwrap_or_else(T::zero);
    }

    /// Sets the gradient at the output and derives the logit gradient from it.
    pub(crate) fn seed(&mut self, outdelta: T, derivative: T) {
        self.outdelta = outdelta;
        self.delta = outdelta * derivative;
        self.refresh_derivative();
    }

    pub(crate) fn set_logit(&mut self, logit: T) {
        self.logit = logit;
    }

    pub(crate) fn record_cost(&mut self, new_target: T, value: T) {
        if let Role::Output {
            target, cost_val, ..
        } = &mut self.role
        {
            *target = new_target;
            *cost_val = value;
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> &Role<T> {
        &self.role
    }

    pub fn is_input(&self) -> bool {
        self.role == Role::Input
    }

    pub fn is_output(&self) -> bool {
        matches!(self.role, Role::Output { .. })
    }

    pub fn nonlinearity(&self) -> Nonlinearity<T> {
        self.nonlinearity
    }

    pub fn cost_function(&self) -> Option<CostFunction<T>> {
        match self.role {
            Role::Output { cost_function, .. } => Some(cost_function),
            _ => None,
        }
    }

    /// Outgoing connections, in creation order.
    pub fn weights(&self) -> &[ConnectionId] {
        &self.weights
    }

    pub fn logit(&self) -> T {
        self.logit
    }

    pub fn frozenlogit(&self) -> T {
        self.frozenlogit
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    pub fn output(&self) -> T {
        self.output
    }

    pub fn hidden_state(&self) -> &[T] {
        &self.hidden_state
    }

    pub fn derivatives(&self) -> &[T] {
        &self.derivative
    }

    pub fn current_derivative(&self) -> T {
        self.current_derivative
    }

    pub fn delta(&self) -> T {
        self.delta
    }

    pub fn outdelta(&self) -> T {
        self.outdelta
    }

    pub fn dropout(&self) -> T {
        self.dropout
    }

    pub fn recurrent(&self) -> bool {
        self.recurrent
    }

    pub fn target(&self) -> Option<T> {
        match self.role {
            Role::Output { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn cost_val(&self) -> Option<T> {
        match self.role {
            Role::Output { cost_val, .. } => Some(cost_val),
            _ => None,
        }
    }

    /// `None` for fields that do not belong to this unit.
    pub fn read(&self, field: Field) -> Option<FieldValue<T>> {
        let scalar = match field {
            Field::Logit => self.logit,
            Field::FrozenLogit => self.frozenlogit,
            Field::Output => self.output,
            Field::Delta => self.delta,
            Field::OutDelta => self.outdelta,
            Field::Derivative => self.current_derivative,
            Field::Dropout => self.dropout,
            Field::Frozen => return Some(FieldValue::Flag(self.frozen)),
            Field::Recurrent => return Some(FieldValue::Flag(self.recurrent)),
            Field::Target => self.target()?,
            Field::CostVal => self.cost_val()?,
            _ => return None,
        };
        Some(FieldValue::Scalar(scalar))
    }

    /// Writes a plain attribute. `recurrent` changes topology and is handled by
    /// the network.
    pub(crate) fn write(&mut self, field: Field, value: FieldValue<T>) -> Result<()> {
        match (field, value) {
            (Field::Frozen, FieldValue::Flag(frozen)) => self.frozen = frozen,
            (Field::Frozen, _) => return Err(NetworkError::FieldType(field)),
            (Field::Derivative | Field::CostVal | Field::Recurrent, _) => {
                return Err(NetworkError::ReadOnly(field))
            }
            (_, FieldValue::Flag(_)) if Field::UNIT.contains(&field) => {
                return Err(NetworkError::FieldType(field))
            }
            (Field::Logit, FieldValue::Scalar(v)) => self.logit = v,
            (Field::FrozenLogit, FieldValue::Scalar(v)) => self.frozenlogit = v,
            (Field::Output, FieldValue::Scalar(v)) => self.output = v,
            (Field::Delta, FieldValue::Scalar(v)) => self.delta = v,
            (Field::OutDelta, FieldValue::Scalar(v)) => self.outdelta = v,
            (Field::Dropout, FieldValue::Scalar(v)) => self.dropout = v,
            (Field::Target, FieldValue::Scalar(v)) => {
                let clamped = self.nonlinearity.clamp(v);
                match &mut self.role {
                    Role::Output { target, .. } => *target = clamped,
                    _ => return Err(NetworkError::UnsupportedField(field)),
                }
            }
            _ => return Err(NetworkError::UnsupportedField(field)),
        }
        Ok(())
    }
}

impl<T> fmt::Display for Unit<T>
where
    T: Float + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Unit {} {{ logit: {:.4}, output: {:.4}, delta: {:.4} }}",
            self.label, self.logit, self.output, self.delta
        )
    }
}

/// A non-owning list of units stepped together as one layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Group {
    units: Vec<UnitId>,
}

impl Group {
    pub fn new(units: Vec<UnitId>) -> Self {
        Self { units }
    }

    /// Adds `size` units built from `spec`. When `recurrent_interconnected`,
    /// every member also sends to every other member.
    pub fn build<T>(
        net: &mut Network<T>,
        size: usize,
        spec: &UnitSpec<T>,
        recurrent_interconnected: bool,
    ) -> Result<Self>
    where
        T: Float + fmt::Display,
    {
        let units = (0..size)
            .map(|_| net.add_unit(spec.clone()))
            .collect::<Result<Vec<_>>>()?;
        if recurrent_interconnected {
            for &from in &units {
                for &to in units.iter().filter(|&&to| to != from) {
                    net.add_output(from, to, WeightInit::Random)?;
                }
            }
        }
        Ok(Self { units })
    }

    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn freeze<T>(&self, net: &mut Network<T>) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units.iter().try_for_each(|&id| net.freeze(id))
    }

    /// Thaws every member it can and reports the first failure.
    pub fn thaw<T>(&self, net: &mut Network<T>) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units
            .iter()
            .fold(Ok(()), |thawed, &id| thawed.and(net.thaw(id)))
    }

    /// One synchronous layer step: signals sent between members land in the
    /// frozen buffers and only count on the next step. Unknown members fail the
    /// step before anything is frozen, and the group is thawed even when a
    /// member's step fails.
    pub fn go<T>(&self, net: &mut Network<T>) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units.iter().try_for_each(|&id| net.unit(id).map(|_| ()))?;
        self.freeze(net)?;
        let stepped = self.units.iter().try_for_each(|&id| net.go(id));
        let thawed = self.thaw(net);
        stepped.and(thawed)
    }

    pub fn reset<T>(&self, net: &mut Network<T>) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units.iter().try_for_each(|&id| net.reset(id))
    }

    pub fn backprop<T>(&self, net: &mut Network<T>, commit: bool) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units.iter().try_for_each(|&id| net.backprop(id, commit))
    }

    /// Sets each input member's logit; values past the group size are ignored.
    pub fn update<T>(&self, net: &mut Network<T>, values: &[T]) -> Result<()>
    where
        T: Float + fmt::Display,
    {
        self.units
            .iter()
            .zip(values)
            .try_for_each(|(&id, &value)| net.update(id, value))
    }

    /// Mean cost over the output members; zero for an empty group.
    pub fn cost<T>(&self, net: &mut Network<T>, targets: &[T]) -> Result<T>
    where
        T: Float + fmt::Display,
    {
        if self.units.is_empty() {
            return Ok(T::zero());
        }
        let mut total = T::zero();
        for (&id, &target) in self.units.iter().zip(targets) {
            total = total + net.cost(id, target)?;
        }
        let count = T::from(self.units.len()).unwrap_or_else(T::one);
        Ok(total / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_unit() -> Unit<f64> {
        Unit::from_spec(&UnitSpec::hidden().nonlinearity(Nonlinearity::Linear))
    }

    #[test]
    fn frozen_unit_buffers_input() {
        let mut unit = linear_unit();
        unit.receive(1.0);
        unit.freeze();
        unit.receive(2.0);
        assert_eq!(unit.logit(), 1.0);
        assert_eq!(unit.frozenlogit(), 2.0);

        unit.thaw();
        assert_eq!(unit.logit(), 2.0);
        assert_eq!(unit.frozenlogit(), 0.0);
        assert!(!unit.frozen());
    }

    #[test]
    fn forward_stacks_history() {
        let mut unit = Unit::<f64>::from_spec(&UnitSpec::hidden());
        unit.receive(0.0);
        unit.forward();
        unit.receive(100.0);
        unit.forward();
        assert_eq!(unit.hidden_state().len(), 2);
        assert_eq!(unit.derivatives()[0], 0.25);
        assert_eq!(unit.logit(), 0.0);
        assert!(unit.output() > 0.99);
    }

    #[test]
    fn empty_history_is_an_error() {
        let mut unit = linear_unit();
        assert!(matches!(
            unit.pop_state(UnitId::new(3)),
            Err(NetworkError::EmptyHistory { unit: 3 })
        ));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut unit = linear_unit();
        unit.receive(4.0);
        unit.forward();
        unit.freeze();
        unit.receive(1.0);
        unit.reset();
        let once = unit.clone();
        unit.reset();
        assert_eq!(unit, once);
        assert!(unit.hidden_state().is_empty());
        assert_eq!(unit.output(), 0.0);
    }

    #[test]
    fn input_spec_stays_linear() {
        let spec = UnitSpec::<f64>::input().nonlinearity(Nonlinearity::Tanh);
        assert_eq!(spec.nonlinearity, Nonlinearity::Linear);
    }

    #[test]
    fn target_writes_are_clamped() {
        let mut unit = Unit::<f64>::from_spec(&UnitSpec::output());
        unit.write(Field::Target, FieldValue::Scalar(3.0)).unwrap();
        assert_eq!(unit.target(), Some(1.0));

        let mut hidden = linear_unit();
        assert!(matches!(
            hidden.write(Field::Target, FieldValue::Scalar(3.0)),
            Err(NetworkError::UnsupportedField(Field::Target))
        ));
        assert!(matches!(
            hidden.write(Field::CostVal, FieldValue::Scalar(3.0)),
            Err(NetworkError::ReadOnly(Field::CostVal))
        ));
        assert!(matches!(
            hidden.write(Field::Logit, FieldValue::Flag(true)),
            Err(NetworkError::FieldType(Field::Logit))
        ));
    }
}
