use crate::engine::action::{ActionKernel, ActionParts, ApplyIo, CalcIo};
use crate::engine::error::EngineError;
use crate::engine::keywords::{Keywords, ParsedKeywords};
use crate::engine::registry::BuildContext;
use crate::core::models::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallSide {
    Lower,
    Upper,
}

/// Parameters of the wall acting on one argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wall {
    pub at: f64,
    pub kappa: f64,
    pub offset: f64,
    pub exp: f64,
    pub eps: f64,
}

impl Wall {
    /// Energy and generalized force for a distance `cv` from the wall position.
    pub fn evaluate(&self, side: WallSide, cv: f64) -> (f64, f64) {
        let scale = match side {
            WallSide::Lower => (cv - self.offset) / self.eps,
            WallSide::Upper => (cv + self.offset) / self.eps,
        };
        let engaged = match side {
            WallSide::Lower => scale < 0.0,
            WallSide::Upper => scale > 0.0,
        };
        if !engaged {
            return (0.0, 0.0);
        }
        let power = scale.abs().powf(self.exp);
        let force = -(self.kappa / self.eps) * self.exp * power / scale;
        (self.kappa * power, force)
    }
}

/// One-sided harmonic-like wall on every element of every argument.
#[derive(Debug)]
pub struct WallKernel {
    side: WallSide,
    walls: Vec<Wall>,
    forces: Vec<Vec<f64>>,
}

impl WallKernel {
    pub fn new(side: WallSide, walls: Vec<Wall>) -> Self {
        let forces = vec![Vec::new(); walls.len()];
        Self {
            side,
            walls,
            forces,
        }
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }
}

impl ActionKernel for WallKernel {
    fn calculate(&mut self, io: &mut CalcIo<'_>) -> Result<(), EngineError> {
        let mut energy = 0.0;
        let mut total_force2 = 0.0;
        for (i, argument) in io.arguments().iter().enumerate() {
            let wall = self.walls[i];
            let forces = &mut self.forces[i];
            forces.clear();
            for element in 0..argument.len() {
                let x = argument.get(element).map_err(|e| io.fail(e))?;
                let cv = argument.difference(wall.at, x);
                let (e, f) = wall.evaluate(self.side, cv);
                energy += e;
                total_force2 += f * f;
                forces.push(f);
            }
        }
        let outputs = io.outputs_mut();
        let result = outputs[0]
            .set(0, energy)
            .and_then(|_| outputs[1].set(0, total_force2));
        result.map_err(|e| io.fail(e))
    }

    fn apply(&self, io: &mut ApplyIo<'_>) -> Result<(), EngineError> {
        if !io.on_step() {
            return Ok(());
        }
        let stride = io.stride() as f64;
        for (i, forces) in self.forces.iter().enumerate() {
            for (element, &f) in forces.iter().enumerate() {
                if f != 0.0 {
                    io.add_argument_force(i, element, f * stride)?;
                }
            }
        }
        Ok(())
    }

    fn demands_forces(&self) -> bool {
        true
    }

    fn energy(&self, outputs: &[Value]) -> Option<f64> {
        outputs.first().and_then(|v| v.get(0).ok())
    }
}

fn keywords(name: &'static str, description: &'static str) -> Keywords {
    Keywords::new(name, description)
        .compulsory("ARG", "the values on which the wall acts")
        .compulsory("AT", "the positions of the wall, one per argument")
        .compulsory("KAPPA", "the force constants of the wall, one per argument")
        .compulsory_with_default("OFFSET", "0.0", "the offsets for the start of the wall")
        .compulsory_with_default("EXP", "2.0", "the powers of the walls")
        .compulsory_with_default("EPS", "1.0", "the rescaling factors of the walls")
        .with_stride()
        .component("bias", "the instantaneous value of the bias potential")
        .component("force2", "the instantaneous value of the squared force due to the bias")
}

pub fn lower_keywords() -> Keywords {
    keywords(
        "LOWER_WALLS",
        "A wall that keeps values above a threshold: kappa*((at - x - offset)/eps)^exp when engaged",
    )
}

pub fn upper_keywords() -> Keywords {
    keywords(
        "UPPER_WALLS",
        "A wall that keeps values below a threshold: kappa*((x - at + offset)/eps)^exp when engaged",
    )
}

fn build(side: WallSide, ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    let arguments = ctx.arguments(kw, "ARG")?;
    let n = arguments.len();
    let at = kw.per_argument("AT", n)?;
    let kappa = kw.per_argument("KAPPA", n)?;
    let offset = kw.per_argument("OFFSET", n)?;
    let exp = kw.per_argument("EXP", n)?;
    let eps = kw.per_argument("EPS", n)?;
    if let Some(i) = eps.iter().position(|&e| e == 0.0) {
        return Err(EngineError::configuration(
            ctx.label(),
            format!("EPS for argument {i} must be non-zero"),
        ));
    }
    let walls = (0..n)
        .map(|i| Wall {
            at: at[i],
            kappa: kappa[i],
            offset: offset[i],
            exp: exp[i],
            eps: eps[i],
        })
        .collect();
    let stride = kw.usize("STRIDE")?.unwrap_or(1);
    Ok(ActionParts::new(WallKernel::new(side, walls))
        .pilot(stride)
        .arguments(arguments)
        .outputs(vec![Value::scalar("bias", false), Value::scalar("force2", false)]))
}

pub fn build_lower(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    build(WallSide::Lower, ctx, kw)
}

pub fn build_upper(ctx: &BuildContext<'_>, kw: &ParsedKeywords) -> Result<ActionParts, EngineError> {
    build(WallSide::Upper, ctx, kw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::test_support::{build_graph, constant};
    use crate::engine::config::ActionInput;

    fn wall(at: f64) -> Wall {
        Wall {
            at,
            kappa: 2.0,
            offset: 0.0,
            exp: 2.0,
            eps: 1.0,
        }
    }

    #[test]
    fn returns_zero_force_when_wall_not_engaged() {
        let w = wall(1.0);
        assert_eq!(w.evaluate(WallSide::Lower, 0.5), (0.0, 0.0));
        assert_eq!(w.evaluate(WallSide::Lower, 0.0), (0.0, 0.0));
        assert_eq!(w.evaluate(WallSide::Upper, -0.5), (0.0, 0.0));
    }

    #[test]
    fn lower_wall_pushes_values_up() {
        let w = wall(0.0);
        let (energy, force) = w.evaluate(WallSide::Lower, -0.5);
        assert!((energy - 0.5).abs() < 1e-12);
        assert!((force - 2.0).abs() < 1e-12);
    }

    #[test]
    fn force_is_minus_energy_derivative() {
        let w = Wall {
            at: 0.0,
            kappa: 3.0,
            offset: 0.2,
            exp: 3.5,
            eps: 0.7,
        };
        for side in [WallSide::Lower, WallSide::Upper] {
            for cv in [-1.3, -0.4, 0.1, 0.6, 1.7] {
                let h = 1e-6;
                let (e_plus, _) = w.evaluate(side, cv + h);
                let (e_minus, _) = w.evaluate(side, cv - h);
                let numeric = -(e_plus - e_minus) / (2.0 * h);
                let (_, analytic) = w.evaluate(side, cv);
                assert!((numeric - analytic).abs() < 1e-5, "{side:?} at {cv}");
            }
        }
    }

    fn wall_bias(action: &str, value: f64, exp: f64, eps: f64, offset: f64) -> f64 {
        let inputs = vec![
            constant("c", &value.to_string()),
            ActionInput::new(action)
                .label("w")
                .keyword("ARG", "c")
                .keyword("AT", 1.0)
                .keyword("KAPPA", 1.5)
                .keyword("EXP", exp)
                .keyword("EPS", eps)
                .keyword("OFFSET", offset),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.total_bias()
    }

    #[test]
    fn bias_never_decreases_further_into_the_wall() {
        let values: Vec<f64> = (0..=40).map(|i| -2.0 + 0.1 * f64::from(i)).collect();
        for (exp, eps, offset) in [(2.0, 1.0, 0.0), (3.0, 0.5, 0.0), (1.5, 2.0, 0.3), (4.0, 0.7, -0.2)] {
            // Walking up the axis: a lower wall can only relax, an upper wall only tighten.
            let lower: Vec<f64> = values
                .iter()
                .map(|&v| wall_bias("LOWER_WALLS", v, exp, eps, offset))
                .collect();
            let upper: Vec<f64> = values
                .iter()
                .map(|&v| wall_bias("UPPER_WALLS", v, exp, eps, offset))
                .collect();
            for k in 1..values.len() {
                assert!(lower[k] <= lower[k - 1], "lower exp={exp} eps={eps} at {}", values[k]);
                assert!(upper[k] >= upper[k - 1], "upper exp={exp} eps={eps} at {}", values[k]);
            }
            assert!(lower[0] > 0.0 && lower[values.len() - 1] == 0.0);
            assert!(upper[0] == 0.0 && upper[values.len() - 1] > 0.0);
        }
    }

    #[test]
    fn bias_and_forces_flow_to_arguments() {
        let inputs = vec![
            constant("c", "0.5"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "c")
                .keyword("AT", 1.0)
                .keyword("KAPPA", 2.0),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.apply(&mut arena).unwrap();
        assert!((graph.value("lw.bias").unwrap().get(0).unwrap() - 0.5).abs() < 1e-12);
        assert!((graph.value("lw.force2").unwrap().get(0).unwrap() - 4.0).abs() < 1e-12);
        assert!((graph.value("c").unwrap().force(0) - 2.0).abs() < 1e-12);
        assert!((graph.total_bias() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bias_forces_are_scaled_by_stride() {
        let inputs = vec![
            constant("c", "0.5"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "c")
                .keyword("AT", 1.0)
                .keyword("KAPPA", 2.0)
                .keyword("STRIDE", 3i64),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.calculate(&mut arena, 3).unwrap();
        graph.apply(&mut arena).unwrap();
        assert!((graph.value("c").unwrap().force(0) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn vector_arguments_use_their_argument_parameters() {
        let inputs = vec![
            constant("v", "0.0,2.0,0.5"),
            constant("s", "1.0"),
            ActionInput::new("UPPER_WALLS")
                .label("uw")
                .keyword("ARG", "v,s")
                .keyword("AT", "1.0,0.0")
                .keyword("KAPPA", "1.0,10.0"),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        graph.apply(&mut arena).unwrap();
        // v: only 2.0 is above 1.0 (energy 1); s: 1.0 above 0.0 (energy 10)
        assert!((graph.total_bias() - 11.0).abs() < 1e-12);
        let v = graph.value("v").unwrap();
        assert_eq!(v.force(0), 0.0);
        assert!((v.force(1) + 2.0).abs() < 1e-12);
        assert!((graph.value("s").unwrap().force(0) + 20.0).abs() < 1e-12);
    }

    #[test]
    fn parameter_lists_must_match_argument_count() {
        let inputs = vec![
            constant("a", "1.0"),
            constant("b", "1.0"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "a,b")
                .keyword("AT", "1.0,2.0,3.0")
                .keyword("KAPPA", 1.0),
        ];
        assert!(build_graph(&inputs, 1).unwrap_err().is_configuration());
    }

    #[test]
    fn periodic_arguments_use_minimum_image_difference() {
        let inputs = vec![
            ActionInput::new("CONSTANT")
                .label("phi")
                .keyword("VALUE", 3.0)
                .keyword("PERIODIC", "-pi,pi"),
            ActionInput::new("LOWER_WALLS")
                .label("lw")
                .keyword("ARG", "phi")
                .keyword("AT", -3.0)
                .keyword("KAPPA", 1.0),
        ];
        let (mut graph, mut arena) = build_graph(&inputs, 1).unwrap();
        graph.calculate(&mut arena, 0).unwrap();
        // difference(-3, 3) wraps to 6 - 2*pi < 0, so the wall is engaged
        let cv = 6.0 - 2.0 * std::f64::consts::PI;
        assert!((graph.total_bias() - cv * cv).abs() < 1e-12);
    }
}
