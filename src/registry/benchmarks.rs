//! Published benchmark measurements for the built-in engines.
//!
//! Each series was measured on sphere/sphere operations at the triangle counts
//! in [`TRIANGLE_COUNTS`]. VTK did not complete the largest case, so its series
//! are one entry shorter.

use crate::model::Operator;

pub const TRIANGLE_COUNTS: [u64; 7] = [972, 1940, 6958, 27320, 110324, 441496, 1765412];

#[derive(Debug, Clone, Copy)]
pub struct BenchmarkSeries {
    pub union_seconds: &'static [f64],
    pub intersection_seconds: &'static [f64],
    pub difference_seconds: &'static [f64],
    pub union_quality: &'static [f64],
    pub intersection_quality: &'static [f64],
    pub difference_quality: &'static [f64],
}

impl BenchmarkSeries {
    /// Execution time in seconds, aligned with [`TRIANGLE_COUNTS`].
    pub fn seconds(&self, op: Operator) -> &'static [f64] {
        match op {
            Operator::Union => self.union_seconds,
            Operator::Intersection => self.intersection_seconds,
            Operator::Difference => self.difference_seconds,
        }
    }

    /// Average triangle quality of the result, aligned with [`TRIANGLE_COUNTS`].
    pub fn quality(&self, op: Operator) -> &'static [f64] {
        match op {
            Operator::Union => self.union_quality,
            Operator::Intersection => self.intersection_quality,
            Operator::Difference => self.difference_quality,
        }
    }
}

pub static CGAL: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.1458, 0.2223, 0.5972, 1.8644, 7.4354, 33.7484, 190.1539],
    intersection_seconds: &[0.1449, 0.2258, 0.5775, 1.8496, 7.2567, 33.5945, 190.2884],
    difference_seconds: &[0.1456, 0.2274, 0.6068, 1.8707, 7.3269, 33.8812, 204.5565],
    union_quality: &[0.6390, 0.6744, 0.7384, 0.8186, 0.8761, 0.9114, 0.9309],
    intersection_quality: &[0.5895, 0.6424, 0.6993, 0.7928, 0.8592, 0.9030, 0.9266],
    difference_quality: &[0.6344, 0.7006, 0.7648, 0.8376, 0.8886, 0.9192, 0.9350],
};

pub static IGL: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.1666, 0.2293, 0.247, 0.6063, 1.8354, 6.8085, 33.9464],
    intersection_seconds: &[0.1679, 0.2297, 0.2484, 0.6054, 1.8241, 6.4457, 36.9528],
    difference_seconds: &[0.1664, 0.2340, 0.2481, 0.6075, 1.8530, 6.6530, 38.7202],
    union_quality: &[0.6315, 0.6734, 0.7331, 0.8154, 0.8742, 0.9103, 0.9303],
    intersection_quality: &[0.5838, 0.6395, 0.6910, 0.7871, 0.8562, 0.9013, 0.9258],
    difference_quality: &[0.6284, 0.6982, 0.7588, 0.8335, 0.8866, 0.9180, 0.9345],
};

pub static VTK: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.4118, 0.6189, 1.5142, 3.673, 11.3241, 52.2387],
    intersection_seconds: &[0.4118, 0.6183, 1.5209, 3.6708, 10.9282, 55.9625],
    difference_seconds: &[0.4129, 0.6228, 1.5269, 3.7990, 10.9499, 56.4498],
    union_quality: &[0.6065, 0.6474, 0.7227, 0.8101, 0.8707, 0.9084],
    intersection_quality: &[0.5489, 0.5937, 0.6601, 0.7688, 0.8455, 0.8954],
    difference_quality: &[0.5983, 0.6605, 0.7347, 0.8207, 0.8793, 0.9142],
};

pub static IRMB: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.0208, 0.0254, 0.0603, 0.1648, 0.5673, 2.027, 8.3993],
    intersection_seconds: &[0.0201, 0.0247, 0.0582, 0.1572, 0.5295, 1.9357, 10.5941],
    difference_seconds: &[0.0207, 0.0264, 0.0592, 0.1674, 0.5472, 2.5907, 11.4418],
    union_quality: &[0.5958, 0.6503, 0.7237, 0.8077, 0.8698, 0.9086, 0.9278],
    intersection_quality: &[0.6261, 0.6769, 0.6831, 0.7874, 0.8550, 0.8996, 0.9356],
    difference_quality: &[0.5958, 0.6503, 0.7237, 0.7999, 0.8698, 0.9054, 0.9278],
};

pub static CORK: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.0123, 0.0175, 0.0426, 0.1453, 0.6951, 3.4952, 20.1791],
    intersection_seconds: &[0.0119, 0.0168, 0.0408, 0.1391, 0.6435, 3.4335, 20.2468],
    difference_seconds: &[0.0120, 0.0174, 0.0441, 0.1533, 0.6761, 3.5862, 21.3695],
    union_quality: &[0.6387, 0.6741, 0.7382, 0.8184, 0.8760, 0.9113, 0.9308],
    intersection_quality: &[0.5890, 0.6417, 0.6989, 0.7926, 0.8590, 0.9029, 0.9265],
    difference_quality: &[0.6341, 0.7003, 0.7646, 0.8375, 0.8885, 0.9191, 0.9350],
};

pub static MCUT: BenchmarkSeries = BenchmarkSeries {
    union_seconds: &[0.0279, 0.0413, 0.1113, 0.3806, 1.5812, 7.6355, 31.6626],
    intersection_seconds: &[0.0284, 0.0415, 0.1099, 0.3869, 1.6174, 7.7535, 35.3653],
    difference_seconds: &[0.0206, 0.0328, 0.0907, 0.3942, 1.5381, 7.6089, 34.9195],
    union_quality: &[0.6357, 0.6714, 0.7360, 0.8174, 0.8753, 0.9108, 0.9306],
    intersection_quality: &[0.5799, 0.6374, 0.6954, 0.7913, 0.8581, 0.9023, 0.9263],
    difference_quality: &[0.6318, 0.6878, 0.7676, 0.8374, 0.8907, 0.9164, 0.9360],
};
