//! Persistence triplet of a random field.
//!
//! Three artifacts per field: a `key = value` configuration echo
//! (`<base>.field`), a distributed binary cell store (`<base>.stoch.dat`)
//! and an XML descriptor (`<base>.xdmf`) pointing at the store for
//! structured-grid visualization.
//!
//! The store layout is fixed: `u64` dimension count, the global cell counts
//! as `u64`, then the flat cell-major data as little-endian `f64`. Since the
//! slab decomposition splits the last axis, rank slabs concatenate to the
//! global flat order, so rank 0 writes (and reads) slabs in rank order.
//!
//! Errors on rank 0 are reduced before any rank blocks, turning local I/O
//! failures into a collective abort instead of a hang.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use randfield_core::comm::Communicator;
use randfield_core::config::FieldConfig;

use crate::error::{Error, Result};

const IO_TAG: u32 = 96;

pub(crate) fn data_path(base: &str) -> String {
    format!("{base}.stoch.dat")
}

/// Write the distributed cell store; collective over the communicator.
pub(crate) fn write_field_data(
    comm: &Arc<dyn Communicator>,
    base: &str,
    cells: &[usize],
    local_data: &[f64],
) -> Result<()> {
    let rank = comm.rank();
    let size = comm.size();

    let mut local_error = None;
    if rank == 0 {
        if let Err(err) = write_on_root(comm, &data_path(base), cells, local_data, size) {
            local_error = Some(err);
        }
    } else {
        comm.send(0, IO_TAG, local_data);
    }

    let ok = comm.all_reduce_all(local_error.is_none());
    if !ok {
        return Err(match local_error {
            Some(err) => Error::Io(err),
            None => Error::Io(std::io::Error::other("write aborted after failure on rank 0")),
        });
    }
    Ok(())
}

fn write_on_root(
    comm: &Arc<dyn Communicator>,
    path: &str,
    cells: &[usize],
    local_data: &[f64],
    size: usize,
) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&(cells.len() as u64).to_le_bytes())?;
    for &c in cells {
        writer.write_all(&(c as u64).to_le_bytes())?;
    }
    write_values(&mut writer, local_data)?;
    for src in 1..size {
        let chunk = comm.recv(src, IO_TAG);
        write_values(&mut writer, &chunk)?;
    }
    writer.flush()
}

fn write_values<W: Write>(writer: &mut W, values: &[f64]) -> std::io::Result<()> {
    for &v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Read the distributed cell store; collective over the communicator.
///
/// Missing files and geometry disagreements surface on every rank.
pub(crate) fn read_field_data(
    comm: &Arc<dyn Communicator>,
    base: &str,
    cells: &[usize],
    local_data: &mut [f64],
) -> Result<()> {
    let rank = comm.rank();
    let size = comm.size();
    let path = data_path(base);

    let mut missing = false;
    let mut local_error = None;
    let mut own_chunk: Vec<f64> = Vec::new();

    if rank == 0 {
        if !Path::new(&path).exists() {
            missing = true;
        } else {
            match read_on_root(comm, &path, cells, local_data.len(), size) {
                Ok(chunk) => own_chunk = chunk,
                Err(err) => local_error = Some(err),
            }
        }
    }

    if !comm.all_reduce_all(!missing) {
        return Err(Error::MissingFile(path));
    }
    if !comm.all_reduce_all(local_error.is_none()) {
        return Err(match local_error {
            Some(err) => err,
            None => Error::Io(std::io::Error::other("read aborted after failure on rank 0")),
        });
    }

    if rank == 0 {
        local_data.copy_from_slice(&own_chunk);
    } else {
        let chunk = comm.recv(0, IO_TAG);
        local_data.copy_from_slice(&chunk);
    }
    Ok(())
}

fn read_on_root(
    comm: &Arc<dyn Communicator>,
    path: &str,
    cells: &[usize],
    chunk_len: usize,
    size: usize,
) -> std::result::Result<Vec<f64>, Error> {
    let mut reader = BufReader::new(File::open(path)?);

    let dim = read_u64(&mut reader)? as usize;
    if dim != cells.len() {
        return Err(Error::Core(randfield_core::Error::GeometryMismatch(
            format!("stored field is {dim}-dimensional, expected {}", cells.len()),
        )));
    }
    for (axis, &expected) in cells.iter().enumerate() {
        let stored = read_u64(&mut reader)? as usize;
        if stored != expected {
            return Err(Error::Core(randfield_core::Error::GeometryMismatch(
                format!("stored cells[{axis}] = {stored}, expected {expected}"),
            )));
        }
    }

    let mut chunk = vec![0.0f64; chunk_len];
    read_values(&mut reader, &mut chunk)?;
    for dest in 1..size {
        let mut other = vec![0.0f64; chunk_len];
        read_values(&mut reader, &mut other)?;
        comm.send(dest, IO_TAG, &other);
    }
    Ok(chunk)
}

fn read_u64<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_values<R: Read>(reader: &mut R, values: &mut [f64]) -> std::io::Result<()> {
    let mut bytes = [0u8; 8];
    for v in values.iter_mut() {
        reader.read_exact(&mut bytes)?;
        *v = f64::from_le_bytes(bytes);
    }
    Ok(())
}

/// Write the `key = value` configuration echo. Rank-0 local.
pub(crate) fn write_config_echo(path: &str, config: &FieldConfig) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    writeln!(writer, "grid.extensions = {}", join(&config.grid.extensions))?;
    writeln!(writer, "grid.cells = {}", join(&config.grid.cells))?;
    writeln!(writer, "stochastic.variance = {}", config.stochastic.variance)?;
    writeln!(writer, "stochastic.covariance = {}", config.stochastic.covariance)?;
    writeln!(writer, "stochastic.anisotropy = {}", config.stochastic.anisotropy)?;
    writeln!(writer, "stochastic.corrLength = {}", join(&config.stochastic.corr_length))?;
    let rf = &config.random_field;
    writeln!(writer, "randomField.periodic = {}", rf.periodic)?;
    writeln!(writer, "randomField.approximate = {}", rf.approximate)?;
    writeln!(writer, "randomField.verbose = {}", rf.verbose)?;
    writeln!(writer, "randomField.cgIterations = {}", rf.cg_iterations)?;
    writeln!(writer, "randomField.cacheInvMatvec = {}", rf.cache_inv_matvec)?;
    writeln!(writer, "randomField.cacheInvRootMatvec = {}", rf.cache_inv_root_matvec)?;
    writeln!(writer, "randomField.embeddingFactor = {}", rf.embedding_factor)?;
    writer.flush()
}

/// Write the structured-grid XML descriptor. Rank-0 local.
pub(crate) fn write_xdmf(
    path: &str,
    data_file: &str,
    field_name: &str,
    cells: &[usize],
    extensions: &[f64],
) -> std::io::Result<()> {
    let dim = cells.len();
    let mut writer = BufWriter::new(File::create(path)?);

    let reversed: Vec<String> = cells.iter().rev().map(|c| c.to_string()).collect();
    let topology = reversed.join(" ");

    writeln!(writer, "<?xml version=\"1.0\" ?>")?;
    writeln!(writer, "<!DOCTYPE Xdmf SYSTEM \"Xdmf.dtd\" []>")?;
    writeln!(writer, "<Xdmf Version=\"2.0\">")?;
    writeln!(writer, " <Domain>")?;
    writeln!(
        writer,
        "  <Grid Name=\"StructuredGrid\" GridType=\"Uniform\">"
    )?;
    writeln!(
        writer,
        "   <Topology TopologyType=\"3DRectMesh\" NumberOfElements=\"{topology}\"/>"
    )?;
    writeln!(writer, "   <Geometry GeometryType=\"origin_dxdydz\">")?;
    writeln!(
        writer,
        "    <DataItem Dimensions=\"3\" NumberType=\"Float\" Precision=\"4\" Format=\"XML\">"
    )?;
    writeln!(writer, "     0. 0. 0.")?;
    writeln!(writer, "    </DataItem>")?;
    writeln!(
        writer,
        "    <DataItem Dimensions=\"3\" NumberType=\"Float\" Precision=\"4\" Format=\"XML\">"
    )?;
    // Cell densities, with a leading repeat so 2D stores visualize as flat
    // 3D grids.
    writeln!(
        writer,
        "     {} {} {}",
        cells[0] as f64 / extensions[0],
        cells[dim.saturating_sub(2)] as f64 / extensions[dim.saturating_sub(2)],
        cells[dim - 1] as f64 / extensions[dim - 1],
    )?;
    writeln!(writer, "    </DataItem>")?;
    writeln!(writer, "   </Geometry>")?;
    writeln!(
        writer,
        "   <Attribute Name=\"{field_name}\" AttributeType=\"Scalar\" Center=\"Cell\">"
    )?;
    writeln!(
        writer,
        "    <DataItem Dimensions=\"{topology}\" NumberType=\"Float\" Precision=\"4\" Format=\"Binary\">"
    )?;
    writeln!(writer, "     {data_file}")?;
    writeln!(writer, "    </DataItem>")?;
    writeln!(writer, "   </Attribute>")?;
    writeln!(writer, "  </Grid>")?;
    writeln!(writer, " </Domain>")?;
    writeln!(writer, "</Xdmf>")?;
    writer.flush()
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
