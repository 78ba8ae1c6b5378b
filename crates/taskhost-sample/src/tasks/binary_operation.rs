//! Binary operation messages and the processor task

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskhost::{Task, TaskError, TaskExecutionContext};

/// Operators the processor understands
pub const OPERATORS: [&str; 5] = ["+", "-", "*", "/", "%"];

/// "`<left> <operator> <right>`"
///
/// The operator is kept as text: an unknown operator still converts and is
/// reported in the result instead of poisoning the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryOperationMessage {
    pub left: i32,
    pub operator: String,
    pub right: i32,
}

impl BinaryOperationMessage {
    pub fn new(left: i32, operator: impl Into<String>, right: i32) -> Self {
        Self {
            left,
            operator: operator.into(),
            right,
        }
    }
}

impl fmt::Display for BinaryOperationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.operator, self.right)
    }
}

/// Why a message body is not a binary operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOperationError(String);

impl fmt::Display for ParseOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseOperationError {}

impl FromStr for BinaryOperationMessage {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [left, operator, right] = parts.as_slice() else {
            return Err(ParseOperationError(format!(
                "expected '<int> <op> <int>', got {} token(s)",
                parts.len()
            )));
        };

        let operand = |text: &str| {
            text.parse::<i32>()
                .map_err(|e| ParseOperationError(format!("invalid operand '{text}': {e}")))
        };

        Ok(Self {
            left: operand(*left)?,
            operator: operator.to_string(),
            right: operand(*right)?,
        })
    }
}

/// An operation together with its outcome
///
/// `result` is either the arithmetic result or a description of why the
/// operation could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryOperationResultMessage {
    pub operation: BinaryOperationMessage,
    pub result: String,
}

impl fmt::Display for BinaryOperationResultMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.operation, self.result)
    }
}

/// Evaluate an operation, describing domain errors in the result text
pub fn evaluate(operation: &BinaryOperationMessage) -> String {
    let (a, b) = (operation.left, operation.right);
    let value = match operation.operator.as_str() {
        "+" => Some(a.wrapping_add(b)),
        "-" => Some(a.wrapping_sub(b)),
        "*" => Some(a.wrapping_mul(b)),
        "/" => a.checked_div(b),
        "%" => a.checked_rem(b),
        other => return format!("Invalid operation: '{other}'"),
    };

    match value {
        Some(value) => value.to_string(),
        None if b == 0 => "Attempted to divide by zero.".to_string(),
        None => "Arithmetic operation resulted in an overflow.".to_string(),
    }
}

/// Evaluates one binary operation per request message
#[derive(Debug, Default)]
pub struct BinaryOperationProcessorTask;

#[async_trait]
impl Task for BinaryOperationProcessorTask {
    type Argument = BinaryOperationMessage;
    type Output = BinaryOperationResultMessage;

    async fn run(
        &mut self,
        _ctx: &TaskExecutionContext,
        operation: BinaryOperationMessage,
    ) -> Result<BinaryOperationResultMessage, TaskError> {
        let result = evaluate(&operation);
        Ok(BinaryOperationResultMessage { operation, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(s: &str) -> BinaryOperationMessage {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let message = op("12 * 3");
        assert_eq!(message, BinaryOperationMessage::new(12, "*", 3));
        assert_eq!(message.to_string(), "12 * 3");
    }

    #[test]
    fn test_parse_rejects_malformed_bodies() {
        assert!("blablabla...".parse::<BinaryOperationMessage>().is_err());
        assert!("1 +".parse::<BinaryOperationMessage>().is_err());
        assert!("a + 1".parse::<BinaryOperationMessage>().is_err());
        assert!("1 + 2 + 3".parse::<BinaryOperationMessage>().is_err());
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate(&op("7 + 5")), "12");
        assert_eq!(evaluate(&op("7 - 9")), "-2");
        assert_eq!(evaluate(&op("7 * 5")), "35");
        assert_eq!(evaluate(&op("17 / 5")), "3");
        assert_eq!(evaluate(&op("17 % 5")), "2");
    }

    #[test]
    fn test_evaluate_domain_errors() {
        assert_eq!(evaluate(&op("1 / 0")), "Attempted to divide by zero.");
        assert_eq!(evaluate(&op("1 % 0")), "Attempted to divide by zero.");
        assert_eq!(evaluate(&op("1 ^ 2")), "Invalid operation: '^'");
        assert_eq!(
            evaluate(&BinaryOperationMessage::new(i32::MIN, "/", -1)),
            "Arithmetic operation resulted in an overflow."
        );
    }

    #[test]
    fn test_result_display() {
        let result = BinaryOperationResultMessage {
            operation: op("1 / 0"),
            result: evaluate(&op("1 / 0")),
        };
        assert_eq!(result.to_string(), "1 / 0 = Attempted to divide by zero.");
    }
}
