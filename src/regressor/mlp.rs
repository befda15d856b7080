//! Multilayer perceptron regression.
//!
//! A fully connected network with one linear output node, trained by online
//! back-propagation on standardised inputs and target.
use crate::constants::{MLP_DEFAULT_CYCLES, MLP_DEFAULT_HIDDEN, MLP_DEFAULT_LEARNING_RATE};
use crate::data::Matrix;
use crate::errors::CalibrationError;
use crate::method::MethodOptions;
use crate::regressor::{standardisation, Regressor};
use crate::utils::{items_to_strings, validate_float_parameter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    Sigmoid,
    Relu,
    Linear,
}

impl FromStr for Activation {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "relu" | "ReLU" => Ok(Activation::Relu),
            "linear" => Ok(Activation::Linear),
            _ => Err(CalibrationError::ParseString(
                s.to_string(),
                "NeuronType".to_string(),
                items_to_strings(vec!["tanh", "sigmoid", "relu", "linear"]),
            )),
        }
    }
}

impl Activation {
    #[inline]
    fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Relu => x.max(0.0),
            Activation::Linear => x,
        }
    }

    /// Derivative expressed through the activated value `a`.
    #[inline]
    fn derivative(&self, a: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - a * a,
            Activation::Sigmoid => a * (1.0 - a),
            Activation::Relu => {
                if a > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
        }
    }
}

/// One entry of a `HiddenLayers` string: an absolute width, or a width
/// relative to the number of inputs (`N`, `N+2`, `N-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerWidth {
    Absolute(usize),
    Relative(i64),
}

impl LayerWidth {
    fn parse(token: &str) -> Result<Self, CalibrationError> {
        let bad = || {
            CalibrationError::InvalidParameter(
                "HiddenLayers".to_string(),
                "comma separated widths such as N,N-1 or 8,4".to_string(),
                token.to_string(),
            )
        };
        let token = token.trim();
        if let Some(rest) = token.strip_prefix('N') {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(LayerWidth::Relative(0));
            }
            let offset = match rest.strip_prefix('+') {
                Some(r) => r.trim().parse::<i64>().map_err(|_| bad())?,
                None => rest.replace(' ', "").parse::<i64>().map_err(|_| bad())?,
            };
            return Ok(LayerWidth::Relative(offset));
        }
        token.parse::<usize>().map(LayerWidth::Absolute).map_err(|_| bad())
    }

    fn resolve(&self, n_inputs: usize) -> usize {
        match self {
            LayerWidth::Absolute(w) => (*w).max(1),
            LayerWidth::Relative(o) => (n_inputs as i64 + o).max(1) as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpParams {
    pub hidden: Vec<LayerWidth>,
    pub activation: Activation,
    pub cycles: usize,
    pub learning_rate: f64,
}

impl Default for MlpParams {
    fn default() -> Self {
        MlpParams {
            hidden: vec![LayerWidth::Relative(0), LayerWidth::Relative(-1)],
            activation: Activation::Tanh,
            cycles: MLP_DEFAULT_CYCLES,
            learning_rate: MLP_DEFAULT_LEARNING_RATE,
        }
    }
}

impl MlpParams {
    pub fn from_options(options: &MethodOptions) -> Result<Self, CalibrationError> {
        let hidden = options
            .get_str("HiddenLayers")
            .unwrap_or(MLP_DEFAULT_HIDDEN)
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(LayerWidth::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let activation = match options.get_str("NeuronType") {
            Some(s) => Activation::from_str(s)?,
            None => Activation::Tanh,
        };
        let learning_rate = options.get_f64("LearningRate", MLP_DEFAULT_LEARNING_RATE)?;
        validate_float_parameter(learning_rate, f64::MIN_POSITIVE, 10.0, "LearningRate")?;
        Ok(MlpParams {
            hidden,
            activation,
            cycles: options.get_usize("NCycles", MLP_DEFAULT_CYCLES)?,
            learning_rate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// `weights[o][i]` connects input `i` to output `o`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl Layer {
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (inputs as f64).sqrt();
        Layer {
            weights: (0..outputs)
                .map(|_| (0..inputs).map(|_| rng.gen_range(-bound..bound)).collect())
                .collect(),
            bias: vec![0.0; outputs],
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(self.bias.iter())
            .map(|(w, b)| b + w.iter().zip(input.iter()).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpModel {
    pub activation: Activation,
    /// Hidden layers followed by the single node output layer.
    pub layers: Vec<Layer>,
    pub input_scale: Vec<(f64, f64)>,
    pub target_mean: f64,
    pub target_std: f64,
}

impl MlpModel {
    pub fn fit(params: &MlpParams, data: &Matrix<f64>, y: &[f64], seed: u64) -> Result<Self, CalibrationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_inputs = data.cols;
        let mut widths = vec![n_inputs];
        widths.extend(params.hidden.iter().map(|w| w.resolve(n_inputs)));
        widths.push(1);
        let layers = widths.windows(2).map(|w| Layer::new(w[0], w[1], &mut rng)).collect();

        let input_scale = standardisation(data);
        let (target_mean, target_std) = match crate::utils::mean_rms(y) {
            Some((m, s)) if s > 0.0 => (m, s),
            Some((m, _)) => (m, 1.0),
            None => (0.0, 1.0),
        };
        let mut model = MlpModel {
            activation: params.activation,
            layers,
            input_scale,
            target_mean,
            target_std,
        };

        let inputs: Vec<Vec<f64>> = (0..data.rows).map(|i| model.scale(&data.get_row(i))).collect();
        let targets: Vec<f64> = y.iter().map(|v| (v - target_mean) / target_std).collect();
        let mut order: Vec<usize> = (0..data.rows).collect();
        for _ in 0..params.cycles {
            order.shuffle(&mut rng);
            for &i in &order {
                model.step(&inputs[i], targets[i], params.learning_rate);
            }
        }
        Ok(model)
    }

    fn scale(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.input_scale.iter())
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    /// Activations of every layer, input first.
    fn forward(&self, input: Vec<f64>) -> Vec<Vec<f64>> {
        let mut activations = vec![input];
        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activations[l]);
            let a = if l == last {
                z
            } else {
                z.into_iter().map(|v| self.activation.apply(v)).collect()
            };
            activations.push(a);
        }
        activations
    }

    /// One back-propagation update on a single standardised example.
    fn step(&mut self, input: &[f64], target: f64, learning_rate: f64) {
        let activations = self.forward(input.to_vec());
        let last = self.layers.len() - 1;
        let mut delta = vec![activations[last + 1][0] - target];
        for l in (0..self.layers.len()).rev() {
            let previous = &activations[l];
            let next_delta: Vec<f64> = if l > 0 {
                (0..previous.len())
                    .map(|i| {
                        let back: f64 = delta
                            .iter()
                            .zip(self.layers[l].weights.iter())
                            .map(|(d, w)| d * w[i])
                            .sum();
                        back * self.activation.derivative(previous[i])
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let layer = &mut self.layers[l];
            for (o, d) in delta.iter().enumerate() {
                for (w, x) in layer.weights[o].iter_mut().zip(previous.iter()) {
                    *w -= learning_rate * d * x;
                }
                layer.bias[o] -= learning_rate * d;
            }
            delta = next_delta;
        }
    }
}

impl Regressor for MlpModel {
    fn predict(&self, features: &[f64]) -> f64 {
        if self.layers.is_empty() {
            return f64::NAN;
        }
        let activations = self.forward(self.scale(features));
        let output = activations.last().and_then(|a| a.first()).copied().unwrap_or(f64::NAN);
        output * self.target_std + self.target_mean
    }
}
