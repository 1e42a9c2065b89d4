//! CLI demo for the ad_graph engines.
//!
//! Builds `z = x * y`, evaluates it and prints gradients with either engine,
//! and validates both engines against finite differences.

use std::fs;
use std::path::PathBuf;

use ad_graph::prelude::*;
use ad_graph::max_grad_error;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

#[derive(Parser)]
#[command(name = "ad_cli")]
#[command(about = "Computation graph autodiff demo", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Value of x
    #[arg(long, default_value_t = 2.0, global = true, allow_negative_numbers = true)]
    x: f64,

    /// Value of y
    #[arg(long, default_value_t = 2.5, global = true, allow_negative_numbers = true)]
    y: f64,

    /// Element type of x and y
    #[arg(long, value_enum, default_value_t = DtypeArg::Float64, global = true)]
    dtype: DtypeArg,

    /// Write a Graphviz DOT file of the graph into this directory
    #[arg(long = "dot-dir", value_name = "DIR", global = true)]
    dot_dir: Option<PathBuf>,

    /// Print the compiled tape
    #[arg(long = "print-tape", global = true)]
    print_tape: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate z = x * y with the tape machine
    Basic,

    /// Evaluate z = x * y and its gradients with the graph walker
    Autodiff,

    /// Differentiate z = x * y symbolically, then run the tape machine
    Symbolic,

    /// Compare both engines with finite differences on a larger expression
    Check {
        /// Finite difference step [default: 1e-6 for float64, 1e-2 for float32]
        #[arg(long)]
        eps: Option<f64>,

        /// Maximum accepted absolute error [default: 1e-5 for float64, 1e-2 for float32]
        #[arg(long)]
        tolerance: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DtypeArg {
    Float64,
    Float32,
}

impl DtypeArg {
    /// Default finite difference step and tolerance for `check`.
    fn check_defaults(self) -> (f64, f64) {
        match self {
            DtypeArg::Float64 => (1e-6, 1e-5),
            DtypeArg::Float32 => (1e-2, 1e-2),
        }
    }
}

impl From<DtypeArg> for Dtype {
    fn from(arg: DtypeArg) -> Self {
        match arg {
            DtypeArg::Float64 => Dtype::Float64,
            DtypeArg::Float32 => Dtype::Float32,
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Basic => run_basic(&cli)?,
        Commands::Autodiff => run_autodiff(&cli)?,
        Commands::Symbolic => run_symbolic(&cli)?,
        Commands::Check { eps, tolerance } => run_check(&cli, eps, tolerance)?,
    }

    Ok(())
}

/// x and y scalars, z = x * y.
fn make_graph(cli: &Cli) -> anyhow::Result<(Graph, NodeId, NodeId, NodeId)> {
    let dtype = Dtype::from(cli.dtype);
    let mut g = Graph::new();
    let x = g.add_scalar("x", dtype);
    let y = g.add_scalar("y", dtype);
    let z = g.add_named_operation("z", Op::Mul, &[x, y])?;
    g.set_value(x, Value::with_dtype(dtype, vec![cli.x], Shape::scalar())?)?;
    g.set_value(y, Value::with_dtype(dtype, vec![cli.y], Shape::scalar())?)?;
    Ok((g, x, y, z))
}

fn write_dot(cli: &Cli, file: &str, graph: &Graph) -> anyhow::Result<()> {
    let Some(dir) = &cli.dot_dir else {
        return Ok(());
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(file);
    fs::write(&path, graph.to_dot()).with_context(|| format!("writing {}", path.display()))?;
    info!("wrote {}", path.display());
    Ok(())
}

fn print_tape(cli: &Cli, tape: Option<&Tape>) {
    if let (true, Some(tape)) = (cli.print_tape, tape) {
        println!("Tape ({} instructions):", tape.len());
        print!("{}", tape);
    }
}

fn show(m: &impl Machine, label: &str, node: NodeId) -> anyhow::Result<()> {
    match m.value_of(node)? {
        Some(v) => println!("  {} = {}", label, v),
        None => println!("  {} = <not computed>", label),
    }
    Ok(())
}

fn show_grad(m: &impl Machine, label: &str, node: NodeId) -> anyhow::Result<()> {
    match m.gradient_of(node)? {
        Some(v) => println!("  {} = {}", label, v),
        None => println!("  {} = <not computed>", label),
    }
    Ok(())
}

fn run_basic(cli: &Cli) -> anyhow::Result<()> {
    let (mut g, _, _, z) = make_graph(cli)?;
    write_dot(cli, "basic.dot", &g)?;

    println!("=== Tape machine: z = x * y ===");
    println!("At point: x = {}, y = {}", cli.x, cli.y);
    let mut m = TapeMachine::new(&mut g);
    m.run()?;
    print_tape(cli, m.tape());
    show(&m, "z", z)?;
    m.close();
    Ok(())
}

fn run_autodiff(cli: &Cli) -> anyhow::Result<()> {
    let (mut g, x, y, z) = make_graph(cli)?;

    println!("=== Graph walker: z = x * y ===");
    println!("At point: x = {}, y = {}", cli.x, cli.y);
    let mut m = GraphWalker::new(&mut g);
    m.run()?;
    show(&m, "z", z)?;
    show_grad(&m, "dz/dx", x)?;
    show_grad(&m, "dz/dy", y)?;
    m.close();

    write_dot(cli, "autodiff.dot", &g)?;
    Ok(())
}

fn run_symbolic(cli: &Cli) -> anyhow::Result<()> {
    let (mut g, x, y, z) = make_graph(cli)?;
    let grads = differentiate(&mut g, z, &[x, y])?;
    write_dot(cli, "symbolic.dot", &g)?;

    println!("=== Symbolic differentiation + tape machine: z = x * y ===");
    println!("At point: x = {}, y = {}", cli.x, cli.y);
    println!("Gradient nodes: {} -> {}, {} -> {}", x, grads[0], y, grads[1]);
    let mut m = TapeMachine::new(&mut g);
    m.run()?;
    print_tape(cli, m.tape());
    show(&m, "z", z)?;
    show_grad(&m, "dz/dx", x)?;
    show_grad(&m, "dz/dy", y)?;
    m.close();
    Ok(())
}

/// z = (x*y + sin(x)) / (y + 2)
fn build_check_graph(cli: &Cli) -> anyhow::Result<(Graph, NodeId, NodeId, NodeId)> {
    let dtype = Dtype::from(cli.dtype);
    let mut g = Graph::new();
    let x = g.add_scalar("x", dtype);
    let y = g.add_scalar("y", dtype);
    let two = g.add_constant(Value::with_dtype(dtype, vec![2.0], Shape::scalar())?);
    let xy = g.mul(x, y)?;
    let sx = g.sin(x)?;
    let numerator = g.add(xy, sx)?;
    let denominator = g.add(y, two)?;
    let z = g.add_named_operation("z", Op::Div, &[numerator, denominator])?;
    g.set_value(x, Value::with_dtype(dtype, vec![cli.x], Shape::scalar())?)?;
    g.set_value(y, Value::with_dtype(dtype, vec![cli.y], Shape::scalar())?)?;
    Ok((g, x, y, z))
}

fn run_check(cli: &Cli, eps: Option<f64>, tolerance: Option<f64>) -> anyhow::Result<()> {
    let (default_eps, default_tolerance) = cli.dtype.check_defaults();
    let eps = eps.unwrap_or(default_eps);
    let tolerance = tolerance.unwrap_or(default_tolerance);
    let (mut g, x, y, z) = build_check_graph(cli)?;
    let fd = finite_diff_grad(&g, z, &[x, y], eps)?;

    let mut symbolic = g.clone();
    let grads = differentiate(&mut symbolic, z, &[x, y])?;
    write_dot(cli, "check.dot", &symbolic)?;
    let from_tape = {
        let mut m = TapeMachine::new(&mut symbolic);
        m.run()?;
        print_tape(cli, m.tape());
        collect(&m, &grads, Machine::value_of)?
    };

    let from_walker = {
        let options = WalkerOptions::default().with_outputs(&[z]);
        let mut m = GraphWalker::with_options(&mut g, options);
        m.run()?;
        collect(&m, &[x, y], Machine::gradient_of)?
    };

    println!("=== Gradient check: z = (x*y + sin(x)) / (y + 2) ===");
    println!("At point: x = {}, y = {}", cli.x, cli.y);
    for (i, name) in ["x", "y"].iter().enumerate() {
        println!(
            "  dz/d{}: symbolic = {}, walker = {}, finite difference = {}",
            name, from_tape[i], from_walker[i], fd[i]
        );
    }

    let modes = max_grad_error(&from_tape, &from_walker);
    let max_err = max_grad_error(&from_walker, &fd);
    println!("  Max |symbolic - walker|:           {:.2e}", modes);
    println!("  Max |autodiff - finite difference|: {:.2e}", max_err);

    if modes > tolerance || max_err > tolerance {
        bail!("FAIL: error exceeds tolerance ({:.2e})", tolerance);
    }
    println!("PASS: errors within tolerance ({:.2e})", tolerance);
    Ok(())
}

fn collect<M, F>(m: &M, nodes: &[NodeId], read: F) -> anyhow::Result<Vec<Value>>
where
    M: Machine,
    F: for<'a> Fn(&'a M, NodeId) -> ad_graph::Result<Option<&'a Value>>,
{
    let mut out = Vec::with_capacity(nodes.len());
    for &node in nodes {
        match read(m, node)? {
            Some(v) => out.push(v.clone()),
            None => bail!("no value for {}", node),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(args: &[&str]) -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(args)?;
        match cli.command {
            Commands::Check { eps, tolerance } => run_check(&cli, eps, tolerance),
            _ => bail!("not a check command"),
        }
    }

    #[test]
    fn test_check_passes_for_float64() {
        check(&["ad_cli", "check"]).unwrap();
    }

    #[test]
    fn test_check_passes_for_float32_defaults() {
        check(&["ad_cli", "--dtype", "float32", "check"]).unwrap();
    }

    #[test]
    fn test_explicit_eps_overrides_default() {
        let cli = Cli::try_parse_from(["ad_cli", "check", "--eps", "1e-4"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check { eps: Some(e), tolerance: None } if e == 1e-4
        ));
    }
}
