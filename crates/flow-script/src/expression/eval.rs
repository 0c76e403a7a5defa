//! Evaluator for the Lisp-family expression language: pure functions of the
//! resolved input attributes, no mutation, no I/O (§4.6).

use serde_json::{Map, Value};

use crate::engine::ScriptError;
use crate::expression::parser::Sexpr;

pub fn eval(expr: &Sexpr, inputs: &Value) -> Result<Value, ScriptError> {
    match expr {
        Sexpr::Num(n) => Ok(serde_json::json!(n)),
        Sexpr::Str(s) => Ok(Value::String(s.clone())),
        Sexpr::Bool(b) => Ok(Value::Bool(*b)),
        Sexpr::Sym(name) => lookup(name, inputs),
        Sexpr::List(items) => eval_list(items, inputs),
    }
}

fn lookup(name: &str, inputs: &Value) -> Result<Value, ScriptError> {
    inputs
        .get(name)
        .cloned()
        .ok_or_else(|| ScriptError::Eval(format!("unbound variable '{name}'")))
}

fn eval_list(items: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    let (head, rest) = items.split_first().ok_or_else(|| ScriptError::Eval("empty expression".into()))?;
    let op = match head {
        Sexpr::Sym(s) => s.as_str(),
        _ => return Err(ScriptError::Eval("head of a list must be a symbol".into())),
    };

    match op {
        "if" => eval_if(rest, inputs),
        "and" => eval_and(rest, inputs),
        "or" => eval_or(rest, inputs),
        "not" => eval_not(rest, inputs),
        "object" => eval_object(rest, inputs),
        "+" | "-" | "*" | "/" => eval_arith(op, rest, inputs),
        ">" | "<" | ">=" | "<=" | "=" | "!=" => eval_compare(op, rest, inputs),
        other => Err(ScriptError::Eval(format!("unknown operator '{other}'"))),
    }
}

fn eval_if(args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    let [cond, then_branch, else_branch] = args else {
        return Err(ScriptError::Eval("'if' takes exactly 3 arguments".into()));
    };
    if as_bool(&eval(cond, inputs)?)? {
        eval(then_branch, inputs)
    } else {
        eval(else_branch, inputs)
    }
}

fn eval_and(args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    for a in args {
        if !as_bool(&eval(a, inputs)?)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn eval_or(args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    for a in args {
        if as_bool(&eval(a, inputs)?)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn eval_not(args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    let [a] = args else {
        return Err(ScriptError::Eval("'not' takes exactly 1 argument".into()));
    };
    Ok(Value::Bool(!as_bool(&eval(a, inputs)?)?))
}

fn eval_object(args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    if args.len() % 2 != 0 {
        return Err(ScriptError::Eval("'object' takes an even number of key/value arguments".into()));
    }
    let mut map = Map::new();
    let mut it = args.iter();
    while let (Some(key_expr), Some(val_expr)) = (it.next(), it.next()) {
        let key = match key_expr {
            Sexpr::Str(s) => s.clone(),
            Sexpr::Sym(s) => s.clone(),
            _ => return Err(ScriptError::Eval("'object' keys must be string literals or symbols".into())),
        };
        map.insert(key, eval(val_expr, inputs)?);
    }
    Ok(Value::Object(map))
}

fn eval_arith(op: &str, args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    if args.is_empty() {
        return Err(ScriptError::Eval(format!("'{op}' requires at least one argument")));
    }
    let mut nums = Vec::with_capacity(args.len());
    for a in args {
        nums.push(as_num(&eval(a, inputs)?)?);
    }
    let result = match op {
        "+" => nums.iter().sum(),
        "*" => nums.iter().product(),
        "-" if nums.len() == 1 => -nums[0],
        "-" => nums[1..].iter().fold(nums[0], |acc, n| acc - n),
        "/" if nums.len() == 1 => 1.0 / nums[0],
        "/" => {
            let mut iter = nums.iter();
            let first = *iter.next().unwrap();
            let mut acc = first;
            for n in iter {
                if *n == 0.0 {
                    return Err(ScriptError::Eval("division by zero".into()));
                }
                acc /= n;
            }
            acc
        }
        _ => unreachable!(),
    };
    Ok(serde_json::json!(result))
}

fn eval_compare(op: &str, args: &[Sexpr], inputs: &Value) -> Result<Value, ScriptError> {
    let [lhs, rhs] = args else {
        return Err(ScriptError::Eval(format!("'{op}' takes exactly 2 arguments")));
    };
    let l = eval(lhs, inputs)?;
    let r = eval(rhs, inputs)?;
    let result = match op {
        "=" => l == r,
        "!=" => l != r,
        _ => {
            let ln = as_num(&l)?;
            let rn = as_num(&r)?;
            match op {
                ">" => ln > rn,
                "<" => ln < rn,
                ">=" => ln >= rn,
                "<=" => ln <= rn,
                _ => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn as_num(v: &Value) -> Result<f64, ScriptError> {
    v.as_f64().ok_or_else(|| ScriptError::Eval(format!("expected a number, got {v}")))
}

fn as_bool(v: &Value) -> Result<bool, ScriptError> {
    v.as_bool().ok_or_else(|| ScriptError::Eval(format!("expected a boolean, got {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parser::parse;
    use serde_json::json;

    fn run(source: &str, inputs: &Value) -> Result<Value, ScriptError> {
        eval(&parse(source).unwrap(), inputs)
    }

    #[test]
    fn arithmetic_and_variable_lookup() {
        let inputs = json!({"x": 3, "y": 4});
        assert_eq!(run("(+ x (* y 2))", &inputs).unwrap(), json!(11.0));
    }

    #[test]
    fn comparisons_and_boolean_combinators() {
        let inputs = json!({"score": 7});
        assert_eq!(run("(and (> score 5) (< score 10))", &inputs).unwrap(), json!(true));
        assert_eq!(run("(not (= score 7))", &inputs).unwrap(), json!(false));
    }

    #[test]
    fn if_selects_the_matching_branch() {
        let inputs = json!({"score": 3});
        assert_eq!(run("(if (> score 5) \"high\" \"low\")", &inputs).unwrap(), json!("low"));
    }

    #[test]
    fn object_builds_an_output_map() {
        let inputs = json!({"n": 2});
        let out = run("(object \"doubled\" (* n 2) \"label\" \"ok\")", &inputs).unwrap();
        assert_eq!(out, json!({"doubled": 4.0, "label": "ok"}));
    }

    #[test]
    fn division_by_zero_is_a_typed_error() {
        let inputs = json!({});
        assert!(run("(/ 1 0)", &inputs).is_err());
    }

    #[test]
    fn unbound_variable_is_a_typed_error() {
        let inputs = json!({});
        assert!(run("(+ missing 1)", &inputs).is_err());
    }
}
