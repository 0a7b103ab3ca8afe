//! Watch expressions and their latest results.

use serde::{Deserialize, Serialize};

use crate::{
    command::EvaluationOutcome,
    error::Rejection,
    types::Value,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The last result was computed against a frame that is no longer selected
    #[serde(default)]
    pub stale: bool,
}

impl Expression {
    fn new(input: String) -> Self {
        Self {
            input,
            value: None,
            error: None,
            stale: true,
        }
    }

    fn invalidate(&mut self) {
        self.value = None;
        self.error = None;
        self.stale = true;
    }

    fn apply(&mut self, outcome: EvaluationOutcome) {
        match outcome {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
            }
            Err(message) => {
                self.value = None;
                self.error = Some(message);
            }
        }
        self.stale = false;
    }
}

/// Ordered list of watch expressions, unique by input
#[derive(Debug, Default)]
pub struct ExpressionEvaluator {
    expressions: Vec<Expression>,
    expression_error: Option<String>,
}

impl ExpressionEvaluator {
    pub fn get(&self, input: &str) -> Option<&Expression> {
        self.expressions.iter().find(|e| e.input == input)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expression> {
        self.expressions.iter()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Failure of an evaluation request as a whole, as opposed to one expression's error
    pub fn expression_error(&self) -> Option<&str> {
        self.expression_error.as_deref()
    }

    pub(crate) fn inputs(&self) -> Vec<String> {
        self.expressions.iter().map(|e| e.input.clone()).collect()
    }

    fn position(&self, input: &str) -> Option<usize> {
        self.expressions.iter().position(|e| e.input == input)
    }

    /// Add an expression, or mark the existing one with this input for re-evaluation
    pub(crate) fn upsert(&mut self, input: &str) {
        match self.position(input) {
            Some(index) => self.expressions[index].invalidate(),
            None => self.expressions.push(Expression::new(input.to_string())),
        }
    }

    /// Change the input of an expression in place.
    ///
    /// If another expression already has the new input the edited one is
    /// dropped so inputs stay unique.
    pub(crate) fn update(&mut self, old_input: &str, new_input: &str) -> Result<(), Rejection> {
        let index = self
            .position(old_input)
            .ok_or_else(|| Rejection::UnknownExpression(old_input.to_string()))?;

        match self.position(new_input) {
            Some(existing) if existing != index => {
                self.expressions.remove(index);
                if let Some(expression) = self.expressions.iter_mut().find(|e| e.input == new_input) {
                    expression.invalidate();
                }
            }
            _ => {
                let expression = &mut self.expressions[index];
                expression.input = new_input.to_string();
                expression.invalidate();
            }
        }
        Ok(())
    }

    pub(crate) fn delete(&mut self, input: &str) -> bool {
        let before = self.expressions.len();
        self.expressions.retain(|e| e.input != input);
        before != self.expressions.len()
    }

    pub(crate) fn clear_error(&mut self) {
        self.expression_error = None;
    }

    pub(crate) fn set_error(&mut self, message: String) {
        self.expression_error = Some(message);
    }

    /// Forget every result; they belong to a frame that is no longer selected
    pub(crate) fn invalidate(&mut self) {
        for expression in &mut self.expressions {
            expression.invalidate();
        }
    }

    /// Record the outcome for `input`, returning false if the expression was deleted meanwhile
    pub(crate) fn apply(&mut self, input: &str, outcome: EvaluationOutcome) -> bool {
        match self.expressions.iter_mut().find(|e| e.input == input) {
            Some(expression) => {
                expression.apply(outcome);
                true
            }
            None => false,
        }
    }

    /// Install results recorded at a point in the execution history
    pub(crate) fn replace_results(&mut self, results: Vec<(String, EvaluationOutcome)>) {
        self.invalidate();
        for (input, outcome) in results {
            self.apply(&input, outcome);
        }
    }
}
