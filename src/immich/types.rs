use serde::Deserialize;

/// A single asset as listed by `GET /albums/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAsset {
    pub id: String,
    pub original_file_name: String,
    /// Opaque server-provided checksum. Stored, never verified.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Album entry as listed by `GET /albums`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumSummary {
    pub id: String,
    pub album_name: String,
    #[serde(default)]
    pub asset_count: u64,
}

/// Body of `GET /albums/{id}`; only the asset list is consumed.
#[derive(Debug, Deserialize)]
pub(crate) struct AlbumDetail {
    #[serde(default)]
    pub assets: Vec<RemoteAsset>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_album_detail_parses_assets_in_order() {
        let body = json!({
            "id": "album-1",
            "albumName": "Frame",
            "assets": [
                {"id": "a1", "originalFileName": "x.jpg", "checksum": "c1", "type": "IMAGE"},
                {"id": "a2", "originalFileName": "y.jpg"}
            ]
        });
        let detail: AlbumDetail = serde_json::from_value(body).unwrap();
        assert_eq!(detail.assets.len(), 2);
        assert_eq!(detail.assets[0].id, "a1");
        assert_eq!(detail.assets[0].checksum.as_deref(), Some("c1"));
        assert_eq!(detail.assets[1].original_file_name, "y.jpg");
        assert!(detail.assets[1].checksum.is_none());
    }

    #[test]
    fn test_album_detail_without_assets_field() {
        let detail: AlbumDetail = serde_json::from_value(json!({"id": "empty"})).unwrap();
        assert!(detail.assets.is_empty());
    }

    #[test]
    fn test_null_checksum() {
        let asset: RemoteAsset = serde_json::from_value(
            json!({"id": "a3", "originalFileName": "z.heic", "checksum": null}),
        )
        .unwrap();
        assert!(asset.checksum.is_none());
    }

    #[test]
    fn test_album_summary_defaults_count() {
        let album: AlbumSummary =
            serde_json::from_value(json!({"id": "b1", "albumName": "Trips"})).unwrap();
        assert_eq!(album.asset_count, 0);
        assert_eq!(album.album_name, "Trips");
    }
}
