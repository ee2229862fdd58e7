use log::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;
use std::path::PathBuf;
use stitch_core::nalgebra::{Point3, Vector3};
use stitch_core::{ModelKind, PointCorrespondence, ViewId};
use stitch_solve::{AlignmentProblem, AlignmentResult, ViewPairMatches};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(
    name = "stitch-sandbox",
    about = "Aligns a synthetic grid of overlapping tiles and reports the solved transforms"
)]
struct Opt {
    /// Tiles along x.
    #[structopt(long, default_value = "4")]
    width: u32,
    /// Tiles along y.
    #[structopt(long, default_value = "3")]
    height: u32,
    /// Distance between neighboring tile origins.
    #[structopt(long, default_value = "100.0")]
    spacing: f64,
    /// Correspondences per neighboring pair.
    #[structopt(long, default_value = "20")]
    matches: usize,
    /// Uniform jitter added to each correspondence, per axis.
    #[structopt(long, default_value = "0.25")]
    noise: f64,
    /// Model family to solve with (translation, rigid or affine).
    #[structopt(long, default_value = "translation")]
    model: ModelKind,
    /// Seed for the synthetic dataset.
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// Solve strong links first and rescue the rest with weak links.
    #[structopt(long)]
    two_round: bool,
    /// Fraction of pairs demoted to weak, metadata-grade links.
    #[structopt(long, default_value = "0.1")]
    weak_fraction: f64,
    /// Write the solved transforms to this file as JSON.
    #[structopt(long)]
    export: Option<PathBuf>,
}

#[derive(Serialize)]
struct TransformRow {
    timepoint: u32,
    setup: u32,
    matrix: [[f64; 4]; 4],
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(opt.seed);

    let id = |x: u32, y: u32| ViewId::new(0, y * opt.width + x);
    let offset = |x: u32, y: u32| Vector3::new(x as f64 * opt.spacing, y as f64 * opt.spacing, 0.0);

    let mut problem = AlignmentProblem::new(opt.model);
    problem.fix_view(id(0, 0));
    let mut links = 0;
    for y in 0..opt.height {
        for x in 0..opt.width {
            for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                if nx >= opt.width || ny >= opt.height {
                    continue;
                }
                let pair = synth_pair(
                    &mut rng,
                    &opt,
                    (id(x, y), offset(x, y)),
                    (id(nx, ny), offset(nx, ny)),
                );
                problem.add_pair_matches(pair);
                links += 1;
            }
        }
    }
    info!(
        "generated a {}x{} tile grid with {} pairwise links of {} correspondences each",
        opt.width, opt.height, links, opt.matches
    );

    let result = if opt.two_round {
        problem.solve_two_round()
    } else {
        problem.solve_iterative()
    };
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!("alignment failed: {}", e);
            std::process::exit(1);
        }
    };
    report(&opt, &result);

    if let Some(path) = &opt.export {
        let mut rows: Vec<TransformRow> = result
            .models
            .iter()
            .map(|(view, model)| {
                let m = model.to_matrix();
                let mut matrix = [[0.0; 4]; 4];
                for r in 0..4 {
                    for c in 0..4 {
                        matrix[r][c] = m[(r, c)];
                    }
                }
                TransformRow {
                    timepoint: view.timepoint,
                    setup: view.setup,
                    matrix,
                }
            })
            .collect();
        rows.sort_by_key(|row| (row.timepoint, row.setup));
        let json = serde_json::to_string_pretty(&rows).expect("failed to serialize transforms");
        std::fs::write(path, json).expect("failed to write the export file");
        info!("wrote {} transforms to {}", rows.len(), path.display());
    }
}

/// Generates the correspondences one pairwise comparison of two overlapping
/// tiles would produce: world points near the shared boundary, expressed in
/// each tile's local coordinates with a little jitter.
fn synth_pair(
    rng: &mut Xoshiro256PlusPlus,
    opt: &Opt,
    (a, ta): (ViewId, Vector3<f64>),
    (b, tb): (ViewId, Vector3<f64>),
) -> ViewPairMatches {
    let midpoint = Point3::from((ta + tb) / 2.0);
    let half = opt.spacing / 4.0;
    let matches = (0..opt.matches)
        .map(|_| {
            let world = midpoint
                + Vector3::new(
                    rng.gen_range(-half..half),
                    rng.gen_range(-half..half),
                    rng.gen_range(-half..half),
                );
            let jitter = Vector3::new(
                rng.gen_range(-opt.noise..opt.noise),
                rng.gen_range(-opt.noise..opt.noise),
                rng.gen_range(-opt.noise..opt.noise),
            );
            PointCorrespondence(world - ta, world - tb + jitter)
        })
        .collect();
    let correlation = if opt.two_round && rng.gen_bool(opt.weak_fraction) {
        0.0
    } else {
        1.0
    };
    ViewPairMatches::new(a, b, matches).correlation(correlation)
}

fn report(opt: &Opt, result: &AlignmentResult) {
    info!(
        "{} after {} iterations over {} tiles: avg residual {:.4} (min {:.4}, max {:.4})",
        if result.converged {
            "converged"
        } else {
            "did not converge"
        },
        result.iterations,
        result.optimized_nodes,
        result.stats.avg,
        result.stats.min,
        result.stats.max
    );
    for removed in &result.removed_links {
        info!(
            "removed link {} -> {} (residual {:.4})",
            removed.views.0, removed.views.1, removed.residual
        );
    }
    for diagnostic in &result.diagnostics {
        warn!("{:?}", diagnostic);
    }

    // Compare against the ground truth grid placement.
    let mut total = 0.0;
    let mut count = 0;
    for y in 0..opt.height {
        for x in 0..opt.width {
            let view = ViewId::new(0, y * opt.width + x);
            if let Some(model) = result.models.get(&view) {
                let placed = model.apply(Point3::origin());
                let truth = Point3::new(
                    x as f64 * opt.spacing,
                    y as f64 * opt.spacing,
                    0.0,
                );
                total += (placed - truth).norm();
                count += 1;
                debug!("{} placed at {:.3} (truth {:.3})", view, placed, truth);
            }
        }
    }
    if count > 0 {
        info!(
            "mean placement error against ground truth: {:.4}",
            total / count as f64
        );
    }
}
