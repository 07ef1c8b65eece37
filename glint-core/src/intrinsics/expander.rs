//! Template expansion: from one `IntrinsicDef` to the concrete overload set
//! it denotes.
//!
//! Free base slots multiply over their scalar classes and size axes over
//! their size lists; matched slots then copy whatever their source resolved
//! to, the method receiver included. A matrix shape driven by an unnamed
//! size axis records that axis' slots so dispatch can apply the overload
//! column by column.

use std::sync::Arc;

use indexmap::IndexSet;

use crate::bail_template;
use crate::error::Result;
use crate::types::{FunctionParam, FunctionType, ScalarKind, SymbolType};

use super::{AutoLoop, IntrinsicDef, IntrinsicOverload, SizeSpec, Slot, SlotBase, RECEIVER};

pub(crate) fn expand(
    name: &str,
    receiver: Option<&SymbolType>,
    defs: &[IntrinsicDef],
) -> Result<Vec<IntrinsicOverload>> {
    let mut overloads = Vec::new();
    for def in defs {
        expand_def(name, receiver, def, &mut overloads)?;
    }
    // A shape with a hidden dimension of one collapses to the same vector as
    // its transpose, so a template can denote one signature twice. The first
    // occurrence wins.
    let mut seen = IndexSet::new();
    overloads.retain(|o| seen.insert((*o.signature).clone()));
    Ok(overloads)
}

/// Value of one shape dimension; 0 while unset.
#[derive(Clone, Copy, Default)]
struct SizeValue {
    value: u32,
    axis: Option<usize>,
}

#[derive(Clone, Default)]
struct SlotState {
    base: Option<SymbolType>,
    size1: SizeValue,
    size2: SizeValue,
}

struct SizeAxis {
    name: Option<&'static str>,
    sizes: Vec<u32>,
    /// (slot, dimension) pairs this axis drives. Extended once, on the first
    /// permutation, with the slots that copy their layout from a driven one.
    locations: Vec<(usize, usize)>,
}

/// One choice index per axis. Yields the all-zero combination even without
/// axes, so a fully exact template still produces its single signature.
struct Odometer {
    digits: Vec<usize>,
    radix: Vec<usize>,
}

impl Odometer {
    fn new(radix: Vec<usize>) -> Odometer {
        Odometer { digits: vec![0; radix.len()], radix }
    }

    fn digits(&self) -> &[usize] {
        &self.digits
    }

    fn advance(&mut self) -> bool {
        for i in (0..self.digits.len()).rev() {
            self.digits[i] += 1;
            if self.digits[i] < self.radix[i] {
                return true;
            }
            self.digits[i] = 0;
        }
        false
    }
}

fn expand_def(
    name: &str,
    receiver: Option<&SymbolType>,
    def: &IntrinsicDef,
    out: &mut Vec<IntrinsicOverload>,
) -> Result<()> {
    let slot_count = def.params.len() + 1;
    let slot = |index: usize| -> &Slot {
        if index == 0 {
            &def.ret
        } else {
            &def.params[index - 1].0
        }
    };

    // Collect the free axes. A slot that copies its layout suppresses its
    // own size axes unless an explicit non-`Any` dimension overrides the
    // copy; the second dimension rides along with the first.
    let mut size_axes: Vec<SizeAxis> = Vec::new();
    let mut base_axes: Vec<(usize, Vec<SymbolType>)> = Vec::new();
    for index in 0..slot_count {
        let s = slot(index);
        if let Some(x) = s.x {
            if s.match_layout.is_none() || x != SizeSpec::Any {
                add_size_axis(&mut size_axes, index, 0, x);
                if let Some(y) = s.y {
                    add_size_axis(&mut size_axes, index, 1, y);
                }
            }
        }
        match &s.base {
            SlotBase::Class(class) => {
                let choices = class.kinds().iter().map(|&k| SymbolType::Scalar(k)).collect();
                base_axes.push((index, choices));
            }
            SlotBase::Exact(ty) => base_axes.push((index, vec![ty.clone()])),
            SlotBase::Matched(_) => {}
        }
    }

    let receiver_info = match receiver {
        Some(ty) => Some(receiver_state(name, ty)?),
        None => None,
    };

    let base_radix: Vec<usize> = base_axes.iter().map(|(_, choices)| choices.len()).collect();
    let size_radix: Vec<usize> = size_axes.iter().map(|a| a.sizes.len()).collect();
    let mut states: Vec<SlotState> = vec![SlotState::default(); slot_count];

    let mut base_odo = Odometer::new(base_radix);
    loop {
        for state in &mut states {
            *state = SlotState::default();
        }
        for ((slot_index, choices), &choice) in base_axes.iter().zip(base_odo.digits()) {
            states[*slot_index].base = Some(choices[choice].clone());
        }
        // Single in-order pass; a matched base may only reference slots that
        // resolved before it.
        for index in 0..slot_count {
            if states[index].base.is_some() {
                continue;
            }
            let SlotBase::Matched(source) = slot(index).base else {
                bail_template!("{name}: parameter {index} declares no element kind");
            };
            let resolved = usize::try_from(source)
                .ok()
                .filter(|&s| s < slot_count)
                .and_then(|s| states[s].base.clone());
            let Some(base) = resolved else {
                bail_template!("{name}: cannot resolve parameter {index} of the template");
            };
            states[index].base = Some(base);
        }

        let mut first_permutation = true;
        let mut size_odo = Odometer::new(size_radix.clone());
        loop {
            for state in &mut states {
                state.size1 = SizeValue::default();
                state.size2 = SizeValue::default();
            }
            for (axis_index, (axis, &choice)) in
                size_axes.iter().zip(size_odo.digits()).enumerate()
            {
                let assigned = SizeValue { value: axis.sizes[choice], axis: Some(axis_index) };
                for &(slot_index, dimension) in &axis.locations {
                    if dimension == 0 {
                        states[slot_index].size1 = assigned;
                    } else {
                        states[slot_index].size2 = assigned;
                    }
                }
            }

            // Layout copies fill whatever the axes left unset. A slot whose
            // base resolved to void adopts the source's element kind too,
            // which is how receiver-typed results get theirs.
            for index in 0..slot_count {
                if states[index].size1.value != 0 {
                    continue;
                }
                let Some(source) = slot(index).match_layout else {
                    continue;
                };
                let source_state = if source == RECEIVER {
                    match &receiver_info {
                        Some(state) => state.clone(),
                        None => bail_template!(
                            "{name}: template expects a receiver but the call has none"
                        ),
                    }
                } else {
                    let resolved = usize::try_from(source).ok().filter(|&s| s < slot_count);
                    let Some(s) = resolved else {
                        bail_template!("{name}: layout reference {source} is out of range");
                    };
                    states[s].clone()
                };
                if matches!(states[index].base, Some(SymbolType::Scalar(ScalarKind::Void))) {
                    states[index].base = source_state.base.clone();
                }
                states[index].size1 = source_state.size1;
                states[index].size2 = source_state.size2;
                if first_permutation {
                    if let Some(axis) = source_state.size1.axis {
                        size_axes[axis].locations.push((index, 0));
                    }
                    if let Some(axis) = source_state.size2.axis {
                        size_axes[axis].locations.push((index, 1));
                    }
                }
            }
            first_permutation = false;

            let resolved = build_types(name, &states, &size_axes)?;
            out.push(build_overload(def, resolved));

            if !size_odo.advance() {
                break;
            }
        }
        if !base_odo.advance() {
            break;
        }
    }
    Ok(())
}

fn add_size_axis(axes: &mut Vec<SizeAxis>, slot: usize, dimension: usize, spec: SizeSpec) {
    let index = match spec {
        SizeSpec::Any => {
            axes.push(SizeAxis { name: None, sizes: vec![1, 2, 3, 4], locations: Vec::new() });
            axes.len() - 1
        }
        SizeSpec::Fixed(n) => {
            axes.push(SizeAxis { name: None, sizes: vec![n], locations: Vec::new() });
            axes.len() - 1
        }
        // Named axes never include 1: a degenerate dimension would collapse
        // the matrix templates that use them into vector signatures with
        // matrix instructions behind them. Scalar and vector cases get their
        // own definitions instead.
        SizeSpec::Named(shared) => match axes.iter().position(|a| a.name == Some(shared)) {
            Some(existing) => existing,
            None => {
                axes.push(SizeAxis {
                    name: Some(shared),
                    sizes: vec![2, 3, 4],
                    locations: Vec::new(),
                });
                axes.len() - 1
            }
        },
    };
    axes[index].locations.push((slot, dimension));
}

/// What a template slot sees when it copies from the receiver: the element
/// kind and width of the value the receiver yields. Sampling always yields a
/// full four-wide texel; a typed buffer yields its declared element.
fn receiver_state(name: &str, receiver: &SymbolType) -> Result<SlotState> {
    let (kind, width) = match receiver {
        SymbolType::Texture { sampled, .. } => (*sampled, 4),
        SymbolType::Buffer { base, .. } => {
            let Some(kind) = base.element_type() else {
                bail_template!("{name}: buffer element {base} has no scalar base");
            };
            (kind, base.component_count())
        }
        other => bail_template!("{name}: receiver {other} cannot anchor a template slot"),
    };
    Ok(SlotState {
        base: Some(SymbolType::Scalar(kind)),
        size1: SizeValue { value: width, axis: None },
        size2: SizeValue::default(),
    })
}

struct ResolvedTypes {
    slots: Vec<SymbolType>,
    auto_loop: Option<AutoLoop>,
}

fn build_types(
    name: &str,
    states: &[SlotState],
    size_axes: &[SizeAxis],
) -> Result<ResolvedTypes> {
    let mut auto_loop_axis: Option<usize> = None;
    let mut auto_loop_columns = 0u32;
    let mut slots = Vec::with_capacity(states.len());
    for (index, state) in states.iter().enumerate() {
        let Some(base) = state.base.clone() else {
            bail_template!("{name}: parameter {index} never resolved");
        };
        let ty = if state.size1.value > 1 && state.size2.value > 1 {
            let SymbolType::Scalar(kind) = base else {
                bail_template!("{name}: parameter {index} gives {base} a matrix shape");
            };
            // A matrix built from an unnamed axis has no row/column pattern
            // of its own, so the call can be applied once per column.
            if let Some(axis) = state.size1.axis {
                if size_axes[axis].name.is_none() {
                    if auto_loop_axis.is_some_and(|existing| existing != axis) {
                        bail_template!("{name}: template declares conflicting column loops");
                    }
                    auto_loop_axis = Some(axis);
                    auto_loop_columns = state.size1.value;
                }
            }
            SymbolType::matrix(kind, state.size2.value, state.size1.value)
        } else if state.size1.value > 1 || state.size2.value > 1 {
            let SymbolType::Scalar(kind) = base else {
                bail_template!("{name}: parameter {index} gives {base} a vector shape");
            };
            SymbolType::vector(kind, state.size1.value.max(state.size2.value))
        } else {
            base
        };
        slots.push(ty);
    }

    // The loop survives only when the result wants no reassembly (void) or
    // reassembles along the very same axis.
    if auto_loop_axis.is_some() {
        let ret = &slots[0];
        let keeps_loop = ret.is_void()
            || (matches!(ret, SymbolType::Matrix { .. }) && states[0].size1.axis == auto_loop_axis);
        if !keeps_loop {
            auto_loop_axis = None;
        }
    }

    let auto_loop = auto_loop_axis.map(|axis| {
        let mut looped: Vec<usize> = size_axes[axis]
            .locations
            .iter()
            .filter(|&&(_, dimension)| dimension == 0)
            .map(|&(slot_index, _)| slot_index)
            .collect();
        looped.sort_unstable();
        looped.dedup();
        AutoLoop { slots: looped, columns: auto_loop_columns }
    });

    Ok(ResolvedTypes { slots, auto_loop })
}

fn build_overload(def: &IntrinsicDef, resolved: ResolvedTypes) -> IntrinsicOverload {
    let params = def
        .params
        .iter()
        .enumerate()
        .map(|(i, (_, modifier))| FunctionParam {
            ty: resolved.slots[i + 1].clone(),
            modifier: *modifier,
            has_default: false,
        })
        .collect();
    IntrinsicOverload {
        signature: Arc::new(FunctionType::new(resolved.slots[0].clone(), params)),
        imp: def.imp,
        auto_loop: resolved.auto_loop,
    }
}
