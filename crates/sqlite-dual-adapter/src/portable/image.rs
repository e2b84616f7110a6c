//! Moving database images in and out of the in-memory connection.
//!
//! sqlx has no wrapper for `sqlite3_serialize`/`sqlite3_deserialize`, so these
//! go through the raw handle. Pointers never outlive the function that locked
//! the handle, which keeps the worker future `Send`.

use std::ffi::{CStr, c_uint, c_void};

use libsqlite3_sys as ffi;
use sqlx::sqlite::SqliteConnection;

use crate::error::classify;
use crate::{Error, Result};

const HEADER: &[u8; 16] = b"SQLite format 3\0";
const HEADER_LEN: usize = 100;

/// Offsets of the file format write/read version bytes. `2` marks WAL mode.
const WRITE_VERSION_OFFSET: usize = 18;
const READ_VERSION_OFFSET: usize = 19;
const LEGACY_JOURNAL: u8 = 1;

/// Validate a dataset file and prepare it for loading.
///
/// A zero-length file is an empty database. WAL-mode images are switched to
/// rollback-journal mode, since an in-memory database cannot open a WAL.
pub(super) fn normalize(mut bytes: Vec<u8>) -> Result<Vec<u8>> {
   if bytes.is_empty() {
      return Ok(bytes);
   }
   if bytes.len() < HEADER_LEN || !bytes.starts_with(HEADER) {
      return Err(Error::StorageIo("file is not a database".to_string()));
   }

   bytes[WRITE_VERSION_OFFSET] = LEGACY_JOURNAL;
   bytes[READ_VERSION_OFFSET] = LEGACY_JOURNAL;
   Ok(bytes)
}

/// Replace the connection's `main` schema with `image`.
pub(super) async fn load(conn: &mut SqliteConnection, image: &[u8]) -> Result<()> {
   let mut handle = conn.lock_handle().await?;
   let db: *mut ffi::sqlite3 = handle.as_raw_handle().as_ptr();

   // SAFETY: db is valid while the handle lock is held, which spans this call.
   unsafe { deserialize(db, image) }
}

/// Serialize the connection's `main` schema into an owned buffer.
pub(super) async fn store(conn: &mut SqliteConnection) -> Result<Vec<u8>> {
   let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
      .fetch_one(&mut *conn)
      .await?;
   if page_count == 0 {
      return Ok(Vec::new());
   }

   let mut handle = conn.lock_handle().await?;
   let db: *mut ffi::sqlite3 = handle.as_raw_handle().as_ptr();

   // SAFETY: as in `load`.
   unsafe { serialize(db) }
}

/// Whether the connection is outside an explicit transaction.
pub(super) async fn is_autocommit(conn: &mut SqliteConnection) -> Result<bool> {
   let mut handle = conn.lock_handle().await?;
   let db: *mut ffi::sqlite3 = handle.as_raw_handle().as_ptr();

   // SAFETY: as in `load`.
   Ok(unsafe { ffi::sqlite3_get_autocommit(db) } != 0)
}

/// Rows changed by every statement since the connection opened.
pub(super) async fn total_changes(conn: &mut SqliteConnection) -> Result<i64> {
   let mut handle = conn.lock_handle().await?;
   let db: *mut ffi::sqlite3 = handle.as_raw_handle().as_ptr();

   // SAFETY: as in `load`.
   Ok(i64::from(unsafe { ffi::sqlite3_total_changes(db) }))
}

/// # Safety
///
/// `db` must be a valid, open connection not used concurrently.
unsafe fn deserialize(db: *mut ffi::sqlite3, image: &[u8]) -> Result<()> {
   let size = image.len() as u64;

   // SQLite takes ownership of the buffer (FREEONCLOSE) and may grow it
   // (RESIZEABLE), so it must come from sqlite3_malloc.
   let buffer = unsafe { ffi::sqlite3_malloc64(size) }.cast::<u8>();
   if buffer.is_null() {
      return Err(Error::Engine(format!("failed to allocate {size} bytes for image")));
   }
   unsafe { std::ptr::copy_nonoverlapping(image.as_ptr(), buffer, image.len()) };

   let flags = (ffi::SQLITE_DESERIALIZE_FREEONCLOSE | ffi::SQLITE_DESERIALIZE_RESIZEABLE) as c_uint;
   let rc = unsafe {
      ffi::sqlite3_deserialize(
         db,
         c"main".as_ptr(),
         buffer,
         size as ffi::sqlite3_int64,
         size as ffi::sqlite3_int64,
         flags,
      )
   };

   if rc != ffi::SQLITE_OK {
      // FREEONCLOSE also applies on failure; the buffer is already released.
      return Err(unsafe { last_error(db, rc) });
   }
   Ok(())
}

/// # Safety
///
/// `db` must be a valid, open connection not used concurrently.
unsafe fn serialize(db: *mut ffi::sqlite3) -> Result<Vec<u8>> {
   let mut size: ffi::sqlite3_int64 = 0;
   let data = unsafe { ffi::sqlite3_serialize(db, c"main".as_ptr(), &mut size, 0) };
   if data.is_null() {
      return Err(Error::Engine("failed to serialize database image".to_string()));
   }

   let bytes = unsafe { std::slice::from_raw_parts(data, size as usize) }.to_vec();
   unsafe { ffi::sqlite3_free(data.cast::<c_void>()) };
   Ok(bytes)
}

unsafe fn last_error(db: *mut ffi::sqlite3, rc: i32) -> Error {
   let message = unsafe {
      let msg = ffi::sqlite3_errmsg(db);
      if msg.is_null() {
         format!("sqlite error {rc}")
      } else {
         CStr::from_ptr(msg).to_string_lossy().into_owned()
      }
   };
   let extended = unsafe { ffi::sqlite3_extended_errcode(db) };
   classify(if extended & 0xff == rc & 0xff { extended } else { rc }, message)
}
