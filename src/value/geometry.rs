use serde::{Deserialize, Serialize};

/// 2-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

/// 3-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 3×3 matrix, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Mat3 {
    pub m: [f64; 9],
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.x, self.y]
    }

    pub fn from_array([x, y]: [f64; 2]) -> Self {
        Vec2 { x, y }
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector; a zero vector normalizes to `(0, 1)`.
    pub fn normalize(self) -> Vec2 {
        let len = self.length();
        if len == 0.0 {
            Vec2::new(0.0, 1.0)
        } else {
            self / len
        }
    }
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn from_array([x, y, z]: [f64; 3]) -> Self {
        Vec3 { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector; a zero vector normalizes to `(0, 1, 0)`.
    pub fn normalize(self) -> Vec3 {
        let len = self.length();
        if len == 0.0 {
            Vec3::new(0.0, 1.0, 0.0)
        } else {
            self / len
        }
    }

    pub fn distance(self, other: Vec3) -> f64 {
        (self - other).length()
    }
}

impl Mat3 {
    pub const ZERO: Mat3 = Mat3 { m: [0.0; 9] };
    pub const IDENTITY: Mat3 = Mat3 {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    pub fn to_array(self) -> [f64; 9] {
        self.m
    }

    pub fn from_array(m: [f64; 9]) -> Self {
        Mat3 { m }
    }

    pub fn from_rows(r0: Vec3, r1: Vec3, r2: Vec3) -> Self {
        Mat3 {
            m: [r0.x, r0.y, r0.z, r1.x, r1.y, r1.z, r2.x, r2.y, r2.z],
        }
    }

    /// Element at zero-based `(row, col)`.
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.m[row * 3 + col]
    }

    pub fn row(&self, row: usize) -> Vec3 {
        Vec3::new(self.at(row, 0), self.at(row, 1), self.at(row, 2))
    }

    pub fn transpose(self) -> Mat3 {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[c * 3 + r] = self.at(r, c);
            }
        }
        Mat3 { m: out }
    }

    pub fn mul_vec(self, v: Vec3) -> Vec3 {
        Vec3::new(self.row(0).dot(v), self.row(1).dot(v), self.row(2).dot(v))
    }

    pub fn mul_mat(self, other: Mat3) -> Mat3 {
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = (0..3).map(|k| self.at(r, k) * other.at(k, c)).sum();
            }
        }
        Mat3 { m: out }
    }

    /// Rodrigues' rotation about `axis` (normalized here) by `angle` radians:
    /// `R = I cos θ + sin θ [k]ₓ + (1 − cos θ) k kᵀ`.
    pub fn rotation(axis: Vec3, angle: f64) -> Mat3 {
        let k = axis.normalize();
        let (s, c) = angle.sin_cos();
        let t = 1.0 - c;
        Mat3 {
            m: [
                c + t * k.x * k.x,
                t * k.x * k.y - s * k.z,
                t * k.x * k.z + s * k.y,
                t * k.y * k.x + s * k.z,
                c + t * k.y * k.y,
                t * k.y * k.z - s * k.x,
                t * k.z * k.x - s * k.y,
                t * k.z * k.y + s * k.x,
                c + t * k.z * k.z,
            ],
        }
    }
}

// Component-wise operations shared by all three shapes. Each type supplies
// `to_array`/`from_array`; everything else goes through the array form.
macro_rules! componentwise {
    ($ty:ident, $n:expr) => {
        impl $ty {
            pub const LEN: usize = $n;

            pub fn splat(v: f64) -> Self {
                Self::from_array([v; $n])
            }

            pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
                Self::from_array(self.to_array().map(f))
            }

            pub fn zip(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
                let (a, b) = (self.to_array(), other.to_array());
                let mut out = [0.0; $n];
                for i in 0..$n {
                    out[i] = f(a[i], b[i]);
                }
                Self::from_array(out)
            }

            /// True when `f` holds for every component pair.
            pub fn all(self, other: Self, f: impl Fn(f64, f64) -> bool) -> bool {
                let (a, b) = (self.to_array(), other.to_array());
                (0..$n).all(|i| f(a[i], b[i]))
            }

            /// Zero-based component read.
            pub fn get(self, i: usize) -> Option<f64> {
                self.to_array().get(i).copied()
            }

            /// Zero-based component write; false when out of range.
            pub fn set(&mut self, i: usize, v: f64) -> bool {
                let mut a = self.to_array();
                match a.get_mut(i) {
                    Some(slot) => {
                        *slot = v;
                        *self = Self::from_array(a);
                        true
                    }
                    None => false,
                }
            }
        }

        impl std::ops::Add for $ty {
            type Output = $ty;
            fn add(self, rhs: $ty) -> $ty {
                self.zip(rhs, |a, b| a + b)
            }
        }

        impl std::ops::Sub for $ty {
            type Output = $ty;
            fn sub(self, rhs: $ty) -> $ty {
                self.zip(rhs, |a, b| a - b)
            }
        }

        impl std::ops::Neg for $ty {
            type Output = $ty;
            fn neg(self) -> $ty {
                self.map(|a| -a)
            }
        }

        impl std::ops::Mul<f64> for $ty {
            type Output = $ty;
            fn mul(self, rhs: f64) -> $ty {
                self.map(|a| a * rhs)
            }
        }

        impl std::ops::Div<f64> for $ty {
            type Output = $ty;
            fn div(self, rhs: f64) -> $ty {
                self.map(|a| a / rhs)
            }
        }
    };
}

componentwise!(Vec2, 2);
componentwise!(Vec3, 3);
componentwise!(Mat3, 9);

impl std::iter::Sum for Vec3 {
    fn sum<I: Iterator<Item = Vec3>>(iter: I) -> Vec3 {
        iter.fold(Vec3::ZERO, |acc, v| acc + v)
    }
}

/// Formats a number the way scripts print it: integral values without `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl std::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", format_number(self.x), format_number(self.y))
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            format_number(self.x),
            format_number(self.y),
            format_number(self.z)
        )
    }
}

impl std::fmt::Display for Mat3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.row(0), self.row(1), self.row(2))
    }
}

// ---- Trajectory geometry ----

/// Angle at `b` formed by `a-b-c`, in degrees.
pub fn angle_deg(a: Vec3, b: Vec3, c: Vec3) -> f64 {
    let (u, v) = (a - b, c - b);
    let denom = u.length() * v.length();
    if denom == 0.0 {
        return 0.0;
    }
    (u.dot(v) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// IUPAC dihedral of `p1-p2-p3-p4` in degrees, in (-180, 180].
pub fn dihedral_deg(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3) -> f64 {
    let b1 = p2 - p1;
    let b2 = p3 - p2;
    let b3 = p4 - p3;
    let n1 = b1.cross(b2);
    let n2 = b2.cross(b3);
    let b2_len = b2.length();
    if b2_len == 0.0 {
        return 0.0;
    }
    let y = n1.cross(n2).dot(b2 / b2_len);
    let x = n1.dot(n2);
    let phi = y.atan2(x).to_degrees();
    if phi <= -180.0 { phi + 360.0 } else { phi }
}

/// Dihedral wrapped to [0, 360).
pub fn torsion_deg(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3) -> f64 {
    let phi = dihedral_deg(p1, p2, p3, p4);
    if phi < 0.0 { phi + 360.0 } else { phi }
}

/// Unsigned dihedral in [0, 180].
pub fn utorsion_deg(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3) -> f64 {
    dihedral_deg(p1, p2, p3, p4).abs()
}
