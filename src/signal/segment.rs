use crate::data::model::Bead;

/// Split `samples` into maximal runs where every sample is strictly above
/// `threshold`.
///
/// Single left-to-right scan. Beads come out ordered by `start`, disjoint and
/// separated by at least one sample `<= threshold`. NaN never exceeds a
/// threshold, so it always terminates a run.
pub fn segment(samples: &[f64], threshold: f64) -> Vec<Bead> {
    let mut beads = Vec::new();
    let mut open: Option<usize> = None;

    for (i, &v) in samples.iter().enumerate() {
        match (open, v > threshold) {
            (None, true) => open = Some(i),
            (Some(start), false) => {
                beads.push(Bead::new(start, i - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        beads.push(Bead::new(start, samples.len() - 1));
    }
    beads
}
