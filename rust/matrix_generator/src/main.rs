use anyhow::{Context, Result};
use ndarray::Array2;
use ndarray_npy::NpzWriter;
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not valid: {}", key, value)),
        Err(_) => Ok(default),
    }
}

/// Uniform [0, 1) samples, like `np.random.rand`.
fn random_matrix(rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), rand::random::<f32>)
}

fn write_npz(path: &Path, matrix: &Array2<f32>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut npz = NpzWriter::new_compressed(file);
    npz.add_array("arr_0", matrix)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    npz.finish()?;
    Ok(())
}

fn main() -> Result<()> {
    let rows: usize = env_or("MATRIX_ROWS", 512)?;
    let cols: usize = env_or("MATRIX_COLS", 512)?;
    let output_dir = PathBuf::from(env::var("OUTPUT_DIR").unwrap_or_else(|_| ".".to_string()));
    fs::create_dir_all(&output_dir)?;

    let path_a = output_dir.join("matrix_a.npz");
    let path_b = output_dir.join("matrix_b.npz");

    write_npz(&path_a, &random_matrix(rows, cols))?;
    write_npz(&path_b, &random_matrix(rows, cols))?;

    println!(
        "DONE: {} and {} created ({}x{} float32)",
        path_a.display(),
        path_b.display(),
        rows,
        cols
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Ix2;
    use ndarray_npy::NpzReader;

    #[test]
    fn test_random_matrix_range() {
        let matrix = random_matrix(8, 16);
        assert_eq!(matrix.dim(), (8, 16));
        assert!(matrix.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_written_file_has_single_entry() {
        let dir = env::temp_dir().join(format!("matrix_generator_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("matrix.npz");

        let matrix = random_matrix(4, 3);
        write_npz(&path, &matrix).unwrap();

        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(npz.names().unwrap().len(), 1);
        let read: Array2<f32> = npz.by_index::<ndarray::OwnedRepr<f32>, Ix2>(0).unwrap();
        assert_eq!(read, matrix);

        fs::remove_dir_all(&dir).unwrap();
    }
}
