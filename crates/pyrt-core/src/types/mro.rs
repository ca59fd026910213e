//! C3 linearization and metaclass resolution (component D).

use crate::error::{ExcType, PyException};
use crate::layout::TypeId;

/// Computes the C3 merge of `type_id`'s own identity with the MROs of its
/// bases (most-derived first, `object` last). `base_mros` must align with
/// `bases` (the already-computed MRO of each base, including the base
/// itself).
pub fn c3_linearize(type_id: TypeId, bases: &[TypeId], base_mros: &[Vec<TypeId>]) -> Result<Vec<TypeId>, PyException> {
    let mut sequences: Vec<Vec<TypeId>> = base_mros.to_vec();
    sequences.push(bases.to_vec());
    sequences.retain(|s| !s.is_empty());

    let mut result = vec![type_id];
    while !sequences.is_empty() {
        let head = sequences.iter().map(|s| s[0]).find(|&candidate| {
            sequences.iter().all(|seq| seq.iter().skip(1).all(|&t| t != candidate))
        });

        let Some(head) = head else {
            return Err(PyException::new(
                ExcType::TypeError,
                "Cannot create a consistent method resolution order (MRO) for bases".to_owned(),
            ));
        };

        result.push(head);
        for seq in &mut sequences {
            if seq.first() == Some(&head) {
                seq.remove(0);
            }
        }
        sequences.retain(|s| !s.is_empty());
    }
    Ok(result)
}

/// Given the explicit metaclass (if any) and the metaclasses of the bases,
/// picks the unique most-derived type in that set. `is_subtype` must
/// reflect the *metaclasses'* own subtype relationship (their MROs), not
/// the class being built.
pub fn resolve_metaclass(
    explicit: Option<TypeId>,
    base_metaclasses: &[TypeId],
    is_subtype: impl Fn(TypeId, TypeId) -> bool,
) -> Result<TypeId, PyException> {
    let mut candidates: Vec<TypeId> = Vec::new();
    if let Some(e) = explicit {
        candidates.push(e);
    }
    for &m in base_metaclasses {
        if !candidates.contains(&m) {
            candidates.push(m);
        }
    }

    let dominant: Vec<TypeId> =
        candidates.iter().copied().filter(|&c| candidates.iter().all(|&other| is_subtype(c, other))).collect();

    match dominant.as_slice() {
        [one] => Ok(*one),
        _ => Err(PyException::new(
            ExcType::TypeError,
            "metaclass conflict: the metaclass of a derived class must be a (non-strict) subclass of the metaclasses of all its bases".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // object=0, A=1, B=2, C=3 (diamond: C(A,B), A(object), B(object))
    #[test]
    fn diamond_inheritance_linearizes() {
        let object = 0;
        let a_mro = vec![1, object];
        let b_mro = vec![2, object];
        let c = 3;
        let mro = c3_linearize(c, &[1, 2], &[a_mro, b_mro]).unwrap();
        assert_eq!(mro, vec![3, 1, 2, object]);
        assert_eq!(*mro.last().unwrap(), object);
    }

    #[test]
    fn inconsistent_bases_raise_type_error() {
        // X(A, B), Y(B, A) then Z(X, Y) is the classic inconsistent case.
        let a = 1;
        let b = 2;
        let x_mro = vec![10, a, b];
        let y_mro = vec![11, b, a];
        let result = c3_linearize(100, &[10, 11], &[x_mro, y_mro]);
        assert!(result.is_err());
    }

    #[test]
    fn metaclass_conflict_when_no_unique_most_derived() {
        // Two unrelated metaclasses with no subtype relation.
        let result = resolve_metaclass(None, &[1, 2], |a, b| a == b);
        assert!(result.is_err());
    }

    #[test]
    fn metaclass_picks_most_derived() {
        // meta=2 is a subtype of meta=1 (type), bases use meta=1 and meta=2.
        let result = resolve_metaclass(None, &[1, 2], |a, b| a == b || (a == 2 && b == 1));
        assert_eq!(result.unwrap(), 2);
    }
}
