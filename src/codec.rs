//! Wire encoding of partial sums.
//!
//! The map stage emits one pair per codebook weight: the key identifies the weight by
//! its (row, col, dim) triple, the value carries the accumulated (numer, denom) sums.
//! Both travel as comma-separated text; what matters to the runtime is only that equal
//! triples encode to equal keys, so every weight lands in exactly one reduce bucket.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use anyhow::{Context, bail};

/// Identifies one scalar weight of the codebook.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeightKey {
    /// grid row, 0 <= row < som_y
    pub row: usize,
    /// grid column, 0 <= col < som_x
    pub col: usize,
    /// component index inside the weight vector, 0 <= dim < ndimen
    pub dim: usize,
}

impl WeightKey {
    pub fn new(row: usize, col: usize, dim: usize) -> Self {
        WeightKey { row, col, dim }
    }
}

impl fmt::Display for WeightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.row, self.col, self.dim)
    }
}

impl FromStr for WeightKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 3 {
            bail!("malformed weight key {:?}, expected row,col,dim", s);
        }
        Ok(WeightKey {
            row: fields[0]
                .parse()
                .with_context(|| format!("bad row in weight key {:?}", s))?,
            col: fields[1]
                .parse()
                .with_context(|| format!("bad col in weight key {:?}", s))?,
            dim: fields[2]
                .parse()
                .with_context(|| format!("bad dim in weight key {:?}", s))?,
        })
    }
} // end of FromStr for WeightKey

/// The pair of sums accumulated for one weight.
///
/// The reduced denominator is the total neighbourhood mass received by the grid node,
/// the numerator the same mass weighted by the matching component of each normalized
/// training vector. Addition is component-wise, so reduction is commutative and
/// associative and the runtime may combine partial sums in any order.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PartialSum {
    pub numer: f32,
    pub denom: f32,
}

impl PartialSum {
    pub fn new(numer: f32, denom: f32) -> Self {
        PartialSum { numer, denom }
    }
}

impl AddAssign for PartialSum {
    fn add_assign(&mut self, rhs: Self) {
        self.numer += rhs.numer;
        self.denom += rhs.denom;
    }
}

impl fmt::Display for PartialSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.numer, self.denom)
    }
}

impl FromStr for PartialSum {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 2 {
            bail!("malformed partial sum {:?}, expected numer,denom", s);
        }
        Ok(PartialSum {
            numer: fields[0]
                .parse()
                .with_context(|| format!("bad numerator in partial sum {:?}", s))?,
            denom: fields[1]
                .parse()
                .with_context(|| format!("bad denominator in partial sum {:?}", s))?,
        })
    }
} // end of FromStr for PartialSum

//===========================================================================

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn weight_key_round_trip() {
        log_init_test();
        let triples = [
            (0usize, 0usize, 0usize),
            (3, 7, 1),
            (49, 49, 255),
            (2147483647, 2147483646, 2147483645),
        ];
        for (row, col, dim) in triples {
            let key = WeightKey::new(row, col, dim);
            let parsed: WeightKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
    }

    #[test]
    fn weight_key_rejects_malformed() {
        log_init_test();
        assert!("1,2".parse::<WeightKey>().is_err());
        assert!("1,2,3,4".parse::<WeightKey>().is_err());
        assert!("a,b,c".parse::<WeightKey>().is_err());
        assert!("1,-2,3".parse::<WeightKey>().is_err());
        assert!("".parse::<WeightKey>().is_err());
    }

    #[test]
    fn partial_sum_round_trip() {
        log_init_test();
        let sums = [
            PartialSum::new(0., 0.),
            PartialSum::new(1.5, 2.25),
            PartialSum::new(-3.7e-12, 8.1e20),
            PartialSum::new(0.1, f32::MIN_POSITIVE),
        ];
        for sum in sums {
            let parsed: PartialSum = sum.to_string().parse().unwrap();
            // Display of f32 is shortest round-trip, re-parsing is exact
            assert_eq!(parsed.numer.to_bits(), sum.numer.to_bits());
            assert_eq!(parsed.denom.to_bits(), sum.denom.to_bits());
        }
    }

    #[test]
    fn partial_sum_addition() {
        log_init_test();
        let mut total = PartialSum::default();
        total += PartialSum::new(1.0, 0.5);
        total += PartialSum::new(2.0, 0.25);
        assert_eq!(total, PartialSum::new(3.0, 0.75));
    }

    #[test]
    fn partial_sum_rejects_malformed() {
        log_init_test();
        assert!("1.0".parse::<PartialSum>().is_err());
        assert!("1.0,2.0,3.0".parse::<PartialSum>().is_err());
        assert!("x,1.0".parse::<PartialSum>().is_err());
    }
} // end of mod tests
