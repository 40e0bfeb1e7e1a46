use std::error::Error;

use nalgebra::{Matrix1, Matrix4, Vector4};
use plotters::prelude::*;
use serde::Serialize;

use cartpole::control::{
    Controller, HybridController, LqrController, SwingUpController, SwingUpGains,
};
use cartpole::models::{CartPole, Formulation, PhysicalParams};
use cartpole::simulation::{simulate, Scenario, Trajectory};

#[derive(Debug, Serialize)]
struct Sample {
    time: f64,
    cart_position: f64,
    cart_velocity: f64,
    pole_angle: f64,
    pole_rate: f64,
    control: f64,
}

fn export_csv(
    path: &str,
    trajectory: &Trajectory,
    controller: &dyn Controller,
) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::Writer::from_path(path)?;
    for (time, x) in trajectory.iter() {
        writer.serialize(Sample {
            time,
            cart_position: x[0],
            cart_velocity: x[1],
            pole_angle: x[2],
            pole_rate: x[3],
            control: controller.control(time, x),
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn plot(path: &str, goal: f64, trajectory: &Trajectory) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    let t_max = trajectory.times().last().copied().unwrap_or(1.0);
    let mut y_min = goal.min(0.0);
    let mut y_max = goal.max(0.0);
    for (_, x) in trajectory.iter() {
        y_min = y_min.min(x[0]).min(x[2]);
        y_max = y_max.max(x[0]).max(x[2]);
    }

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption("cart-pole swing-up", ("sans-serif", 40))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..t_max, (y_min - 0.5)..(y_max + 0.5))?;

    chart.configure_mesh().x_desc("time [s]").draw()?;

    let times = trajectory.times().to_vec();
    chart
        .draw_series(LineSeries::new(
            times.iter().copied().zip(trajectory.positions()),
            &BLUE,
        ))?
        .label("cart position [m]")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            times.iter().copied().zip(trajectory.angles()),
            &RED,
        ))?
        .label("pole angle [rad]")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .draw_series(LineSeries::new([(0.0, goal), (t_max, goal)], &BLACK))?
        .label("goal position [m]")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let params = PhysicalParams::new(1.0, 5.0, 2.0, 9.81, 0.0)?;
    let model = CartPole::new(params, Formulation::ClosedForm);

    let q = Matrix4::from_diagonal(&Vector4::new(10.0, 1.0, 100.0, 1000.0));
    let r = Matrix1::new(0.001);

    let mut rng = rand::thread_rng();
    let scenario = Scenario::swing_up(&mut rng);

    let stabilizer = LqrController::synthesize(&model, &q, &r, scenario.reference)?;
    println!("LQR gain: {}", stabilizer.gain());

    let controller = HybridController::new(
        SwingUpController::new(params, SwingUpGains::default()),
        stabilizer,
        HybridController::DEFAULT_EPS,
    );

    let trajectory = simulate(&model, &controller, scenario.initial_state, 30.0, 0.02)?;

    let goal = scenario.reference[0];
    let (t_final, x_final) = trajectory.last().expect("trajectory covers the horizon");
    println!("goal x = {goal:.2} m");
    println!(
        "after {t_final:.1} s: x = {:.3} m, theta = {:.3} rad",
        x_final[0], x_final[2]
    );

    std::fs::create_dir_all("./img")?;
    export_csv("./img/trajectory.csv", &trajectory, &controller)?;
    plot("./img/cartpole.png", goal, &trajectory)?;
    Ok(())
}
