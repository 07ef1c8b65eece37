//! Overload selection shared by user method calls and intrinsic dispatch.
//!
//! Each candidate signature gets an additive score: zero for an exact
//! argument, small costs for the implicit conversions the IR builder can
//! actually emit, and a penalty for every defaulted trailing parameter.
//! The ranking therefore never selects a signature the conversion pass
//! would later reject.

use crate::types::{FunctionType, ScalarKind, SymbolType};

pub const INCOMPATIBLE: u32 = u32::MAX;

const WIDEN_COST: u32 = 1;
const SIGN_COST: u32 = 2;
const INT_TO_FLOAT_COST: u32 = 3;
const SPLAT_COST: u32 = 4;
const DEFAULT_ARG_PENALTY: u32 = 1;

/// Cost of implicitly converting `from` into `to`, or [`INCOMPATIBLE`].
pub fn conversion_score(from: &SymbolType, to: &SymbolType) -> u32 {
    if from == to {
        return 0;
    }
    match (from, to) {
        (SymbolType::Scalar(a), SymbolType::Scalar(b)) => kind_score(*a, *b),
        (
            SymbolType::Vector { base: a, size: n },
            SymbolType::Vector { base: b, size: m },
        ) if n == m => kind_score(*a, *b),
        (SymbolType::Scalar(a), SymbolType::Vector { base: b, .. })
        | (SymbolType::Scalar(a), SymbolType::Matrix { base: b, .. }) => {
            match kind_score(*a, *b) {
                INCOMPATIBLE => INCOMPATIBLE,
                elem => SPLAT_COST + elem,
            }
        }
        _ => INCOMPATIBLE,
    }
}

fn kind_score(a: ScalarKind, b: ScalarKind) -> u32 {
    if a == b {
        return 0;
    }
    if a.is_integer() && b.is_floating() {
        return INT_TO_FLOAT_COST;
    }
    if a.is_floating() && b.is_floating() {
        // Widening only; narrowing needs an explicit cast.
        return if b.bit_width() > a.bit_width() { WIDEN_COST } else { INCOMPATIBLE };
    }
    if a.is_integer() && b.is_integer() {
        if b.bit_width() < a.bit_width() {
            return INCOMPATIBLE;
        }
        return if a.is_signed() == b.is_signed() { WIDEN_COST } else { SIGN_COST };
    }
    INCOMPATIBLE
}

/// Score of one candidate against a call, or `None` when it cannot apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallScore {
    pub total: u32,
    pub inexact_args: u32,
    pub uses_defaults: bool,
}

impl CallScore {
    fn key(&self) -> (u32, bool, u32) {
        (self.total, self.uses_defaults, self.inexact_args)
    }
}

pub fn score_call(signature: &FunctionType, args: &[SymbolType]) -> Option<CallScore> {
    let param_count = signature.params.len();
    if args.len() > param_count {
        return None;
    }
    let required = param_count - signature.default_count();
    if args.len() < required {
        return None;
    }

    let mut total = 0u32;
    let mut inexact = 0u32;
    for (arg, param) in args.iter().zip(&signature.params) {
        let score = if param.modifier.copies_out() {
            // Writeback targets bind by pointer; no conversion is possible.
            if arg == &param.ty {
                0
            } else {
                return None;
            }
        } else {
            conversion_score(arg, &param.ty)
        };
        if score == INCOMPATIBLE {
            return None;
        }
        if score > 0 {
            inexact += 1;
        }
        total = total.saturating_add(score);
    }
    let defaulted = (param_count - args.len()) as u32;
    total = total.saturating_add(defaulted * DEFAULT_ARG_PENALTY);
    Some(CallScore { total, inexact_args: inexact, uses_defaults: defaulted > 0 })
}

/// Outcome of ranking a candidate set against a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Unique(usize),
    /// Two candidates scored identically on every tie-break.
    Ambiguous(usize, usize),
    NoMatch,
}

pub fn select_overload<'a, I>(candidates: I, args: &[SymbolType]) -> Selection
where
    I: IntoIterator<Item = &'a FunctionType>,
{
    let mut best: Option<(usize, CallScore)> = None;
    let mut tied: Option<usize> = None;

    for (index, signature) in candidates.into_iter().enumerate() {
        let Some(score) = score_call(signature, args) else {
            continue;
        };
        match &best {
            Some((_, current)) if score.key() > current.key() => {}
            Some((held, current)) if score.key() == current.key() => {
                tied = Some(*held);
                best = Some((index, score));
            }
            _ => {
                tied = None;
                best = Some((index, score));
            }
        }
    }

    match (best, tied) {
        (Some((index, _)), Some(other)) => Selection::Ambiguous(other, index),
        (Some((index, _)), None) => Selection::Unique(index),
        (None, _) => Selection::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionParam, ParamModifier};

    fn float_vec(n: u32) -> SymbolType {
        SymbolType::vector(ScalarKind::Float, n)
    }

    fn sig(params: Vec<SymbolType>) -> FunctionType {
        FunctionType::new(
            SymbolType::VOID,
            params.into_iter().map(FunctionParam::new).collect(),
        )
    }

    #[test]
    fn test_conversion_ladder_order() {
        let int = SymbolType::INT;
        let float = SymbolType::FLOAT;
        let double = SymbolType::DOUBLE;
        let uint = SymbolType::UINT;

        let exact = conversion_score(&float, &float);
        let widen = conversion_score(&float, &double);
        let sign = conversion_score(&int, &uint);
        let int_to_float = conversion_score(&int, &float);
        let splat = conversion_score(&float, &float_vec(3));

        assert_eq!(exact, 0);
        assert!(exact < widen && widen < sign && sign < int_to_float && int_to_float < splat);

        // Lossy directions never convert implicitly.
        assert_eq!(conversion_score(&float, &int), INCOMPATIBLE);
        assert_eq!(conversion_score(&double, &float), INCOMPATIBLE);
        assert_eq!(conversion_score(&SymbolType::BOOL, &int), INCOMPATIBLE);
        assert_eq!(conversion_score(&float_vec(2), &float_vec(3)), INCOMPATIBLE);
    }

    #[test]
    fn test_scalar_splats_into_matrices() {
        let m33 = SymbolType::matrix(ScalarKind::Float, 3, 3);
        let splat = conversion_score(&SymbolType::FLOAT, &m33);
        assert_eq!(splat, conversion_score(&SymbolType::FLOAT, &float_vec(3)));
        // The element conversion cost stacks on top of the splat.
        assert!(conversion_score(&SymbolType::INT, &m33) > splat);
        assert_eq!(conversion_score(&float_vec(3), &m33), INCOMPATIBLE);
    }

    #[test]
    fn test_exact_candidate_wins() {
        let candidates = vec![sig(vec![SymbolType::FLOAT]), sig(vec![SymbolType::INT])];
        let picked = select_overload(candidates.iter(), &[SymbolType::INT]);
        assert_eq!(picked, Selection::Unique(1));

        let picked = select_overload(candidates.iter(), &[SymbolType::FLOAT]);
        assert_eq!(picked, Selection::Unique(0));
    }

    #[test]
    fn test_default_arguments_penalized() {
        let padded = FunctionType::new(
            SymbolType::VOID,
            vec![
                FunctionParam::new(SymbolType::FLOAT),
                FunctionParam::new(SymbolType::FLOAT).defaulted(),
            ],
        );
        let plain = sig(vec![SymbolType::FLOAT]);

        // Too few arguments for the required prefix never applies.
        assert!(score_call(&padded, &[]).is_none());

        // The defaulted overload applies but loses to the exact one.
        let score = score_call(&padded, &[SymbolType::FLOAT]).unwrap();
        assert!(score.uses_defaults);
        assert_eq!(score.total, 1);

        let candidates = [plain, padded];
        let picked = select_overload(candidates.iter(), &[SymbolType::FLOAT]);
        assert_eq!(picked, Selection::Unique(0));
    }

    #[test]
    fn test_ambiguous_candidates_detected() {
        let candidates = vec![sig(vec![SymbolType::FLOAT]), sig(vec![SymbolType::DOUBLE])];
        match select_overload(candidates.iter(), &[SymbolType::INT]) {
            Selection::Ambiguous(_, _) => {}
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_out_params_require_exact_type() {
        let out_sig = FunctionType::new(
            SymbolType::VOID,
            vec![FunctionParam::new(SymbolType::FLOAT).with_modifier(ParamModifier::Out)],
        );
        assert!(score_call(&out_sig, &[SymbolType::FLOAT]).is_some());
        assert!(score_call(&out_sig, &[SymbolType::INT]).is_none());
    }
}
