//! `C,R~M,N@X,Y` placement mini-language for the CLI's `--pos`/positional
//! place argument (spec §6 "Placement mini-language").
//!
//! Grounded on `examples/original_source/ikup/place_specification.py`'s
//! `parse_place_specification`: same `@`/`~` splitting, the same `x`->`,`
//! normalization when a part looks like bare integers, and the same
//! `first(...)`/`second(...)` formula wrapping for the two-part `cols,rows`
//! and `max_cols,max_rows` groups (evaluated later by [`crate::formula`]).

use crate::error::{Error, Result};

/// A parsed place specification. Each field, if present, is a
/// [`crate::formula`] expression string to be evaluated once cell-size and
/// position variables are known, not yet a resolved number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceSpec {
    pub cols: Option<String>,
    pub rows: Option<String>,
    pub max_cols: Option<String>,
    pub max_rows: Option<String>,
    pub pos: Option<String>,
}

fn normalize_x_to_comma(spec: &str) -> String {
    if spec.is_empty() {
        return String::new();
    }
    if spec.chars().all(|c| c.is_ascii_digit() || c == 'x' || c == '_') {
        spec.replace('x', ",")
    } else {
        spec.to_string()
    }
}

/// `parse_place_specification(spec)`.
pub fn parse(spec: &str) -> Result<PlaceSpec> {
    let mut result = PlaceSpec::default();
    if spec.is_empty() {
        return Ok(result);
    }

    let size_and_pos: Vec<&str> = spec.split('@').collect();
    if size_and_pos.len() > 2 {
        return Err(Error::InvalidConfig(format!(
            "too many '@' in place specification: '{spec}'"
        )));
    }
    let size_part = size_and_pos[0].trim();
    let pos_part = size_and_pos.get(1).map(|s| s.trim()).unwrap_or("");

    let mut dims_part = "";
    let mut maxdims_part = "";
    let dims_and_maxdims: Vec<&str>;
    if !size_part.is_empty() {
        dims_and_maxdims = size_part.split('~').collect();
        if dims_and_maxdims.len() > 2 {
            return Err(Error::InvalidConfig(format!(
                "too many '~' in place specification: '{spec}'"
            )));
        }
        dims_part = dims_and_maxdims[0].trim();
        maxdims_part = dims_and_maxdims.get(1).map(|s| s.trim()).unwrap_or("");
    }

    let dims_part = normalize_x_to_comma(dims_part);
    let maxdims_part = normalize_x_to_comma(maxdims_part);
    let pos_part = normalize_x_to_comma(pos_part);

    if !dims_part.is_empty() {
        result.cols = Some(format!("first({dims_part})"));
        result.rows = Some(format!("second({dims_part})"));
    }
    if !maxdims_part.is_empty() {
        result.max_cols = Some(format!("first({maxdims_part})"));
        result.max_rows = Some(format!("second({maxdims_part})"));
    }
    if !pos_part.is_empty() {
        result.pos = Some(pos_part);
    }

    Ok(result)
}

/// Evaluate one of [`PlaceSpec`]'s formula fields, treating a bare `_`
/// placeholder (e.g. from `_x_~20,30`) as "not specified" rather than a
/// variable lookup failure — see `DESIGN.md`'s note on this gap between
/// `place_specification.py` and `formula.py`.
pub fn resolve_dimension(formula: &str, variables: &dyn crate::formula::Variables) -> Result<Option<u32>> {
    if formula.trim() == "_" {
        return Ok(None);
    }
    let values = crate::formula::evaluate(formula, variables, Some(1))?;
    Ok(Some(values[0].round() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_is_all_none() {
        assert_eq!(parse("").unwrap(), PlaceSpec::default());
    }

    #[test]
    fn plain_dims_with_x_separator() {
        let spec = parse("5x10").unwrap();
        assert_eq!(spec.cols, Some("first(5,10)".to_string()));
        assert_eq!(spec.rows, Some("second(5,10)".to_string()));
        assert_eq!(spec.max_cols, None);
        assert_eq!(spec.pos, None);
    }

    #[test]
    fn dims_and_position() {
        let spec = parse("5x10@0,2").unwrap();
        assert_eq!(spec.cols, Some("first(5,10)".to_string()));
        assert_eq!(spec.pos, Some("0,2".to_string()));
    }

    #[test]
    fn wildcard_dims_with_max_dims_and_formula_position() {
        let spec = parse("_x_~20,30@cx,cy+1").unwrap();
        assert_eq!(spec.cols, Some("first(_,_)".to_string()));
        assert_eq!(spec.rows, Some("second(_,_)".to_string()));
        assert_eq!(spec.max_cols, Some("first(20,30)".to_string()));
        assert_eq!(spec.max_rows, Some("second(20,30)".to_string()));
        assert_eq!(spec.pos, Some("cx,cy+1".to_string()));
    }

    #[test]
    fn position_only() {
        let spec = parse("@100,200").unwrap();
        assert_eq!(spec.cols, None);
        assert_eq!(spec.pos, Some("100,200".to_string()));
    }

    #[test]
    fn too_many_at_signs_is_an_error() {
        assert!(parse("1x2@3,4@5,6").is_err());
    }

    #[test]
    fn wildcard_dimension_resolves_to_none() {
        let no_vars = |_: &str| -> Result<f64> { Err(Error::FormulaError("no vars".into())) };
        assert_eq!(resolve_dimension("_", &no_vars).unwrap(), None);
    }

    #[test]
    fn numeric_formula_resolves_to_rounded_value() {
        let no_vars = |_: &str| -> Result<f64> { Err(Error::FormulaError("no vars".into())) };
        assert_eq!(resolve_dimension("first(5,10)", &no_vars).unwrap(), Some(5));
    }
}
