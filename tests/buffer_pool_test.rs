use anyhow::Result;

use corvusdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // A standalone pool hands out ids densely from zero
    assert_eq!(page_id, 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    buffer_pool.unpin_page(page_id, false)?;

    // Fetching a page that was never created fails
    assert!(matches!(
        buffer_pool.fetch_page(-1),
        Err(BufferPoolError::PageNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_dirty_page_survives_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    // Write into a page and unpin it dirty
    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[100..105].copy_from_slice(b"hello");
    }
    buffer_pool.unpin_page(page_id, true)?;

    // Fill the pool to force the dirty page out
    for _ in 0..3 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false)?;
    }

    // The bytes come back from disk
    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..105], b"hello");
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_lru_evicts_least_recently_unpinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    // Three pages fill the pool. Mark each one's frame in memory only
    // (unpinned clean, so an eviction discards the marker).
    let mut page_ids = Vec::new();
    for i in 0..3u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        page.write().data[0] = i + 1;
        buffer_pool.unpin_page(page_id, false)?;
        page_ids.push(page_id);
    }

    // Touch p1 so p0 stays the least recently unpinned
    buffer_pool.fetch_page(page_ids[1])?;
    buffer_pool.unpin_page(page_ids[1], false)?;

    // The new page must evict p0, not p1
    let (_, p3) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(p3, false)?;

    // p1 is still resident: its in-memory marker survived
    let p1 = buffer_pool.fetch_page(page_ids[1])?;
    assert_eq!(p1.read().data[0], 2);
    buffer_pool.unpin_page(page_ids[1], false)?;

    // p0 was evicted clean: re-fetching reads zeroed bytes from disk
    let p0 = buffer_pool.fetch_page(page_ids[0])?;
    assert_eq!(p0.read().data[0], 0);
    buffer_pool.unpin_page(page_ids[0], false)?;

    Ok(())
}

#[test]
fn test_new_page_fails_when_all_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, p0) = buffer_pool.new_page()?;
    let (_, _p1) = buffer_pool.new_page()?;

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // Releasing one pin frees a frame
    buffer_pool.unpin_page(p0, false)?;
    let (_, p2) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(p2, false)?;

    Ok(())
}

#[test]
fn test_unpin_accounting() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // One pin, one unpin; the second unpin is an error
    buffer_pool.unpin_page(page_id, false)?;
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));

    // Unpinning a page that is not resident is an error
    assert!(matches!(
        buffer_pool.unpin_page(999, false),
        Err(BufferPoolError::PageNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_pin_count_tracks_fetches() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.fetch_page(page_id)?; // pin count 2

    // One unpin leaves the page pinned, so filling the pool fails
    buffer_pool.unpin_page(page_id, false)?;
    let (_, other) = buffer_pool.new_page()?;
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(other, false)?;
    buffer_pool.new_page()?;

    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }

    buffer_pool.flush_page(page_id)?;
    buffer_pool.unpin_page(page_id, false)?;

    // Flushing a non-resident page fails
    assert!(matches!(
        buffer_pool.flush_page(999),
        Err(BufferPoolError::PageNotFound(_))
    ));

    // Even though the page was unpinned clean, the flush already put the
    // bytes on disk
    for _ in 0..10 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false)?;
    }
    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        let test_data = b"Test Data For Flushing";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched_page.read();
            let expected_data = format!("Test Data {}", i).into_bytes();
            assert_eq!(&page_guard.data[100..100 + expected_data.len()], expected_data.as_slice());
        }
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Deleting while pinned refuses
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;

    // Deleting a page that is not resident succeeds trivially
    buffer_pool.delete_page(page_id)?;
    buffer_pool.delete_page(999)?;

    // The freed frame is reusable
    let (_, new_page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_page_id, false)?;

    Ok(())
}
