/*++

Licensed under the Apache-2.0 license.

File Name:

   commands.rs

Abstract:

    File contains decoders turning SB2.1 and SB3.1 command streams back into commands.

--*/

use sptool_error::SptoolError;
use sptool_image_gen::crc::crc32_mpeg2;
use sptool_image_gen::error;
use sptool_image_types::*;
use zerocopy::FromBytes;

fn sb21_invalid(context: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::SB21_INVALID_CONTAINER, context)
}

fn sb31_invalid(context: impl std::fmt::Display) -> anyhow::Error {
    error(SptoolError::SB31_INVALID_CONTAINER, context)
}

fn slice(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(len)?)
}

/// Decode the decrypted data of one SB2.1 section
///
/// # Arguments
///
/// * `data` - Plain section data, a multiple of 16 bytes
/// * `section` - Index of the section, recorded in command positions
///
/// # Returns
///
/// * `Vec<Command>` - Commands in stream order; NOP commands are skipped
pub fn decode_sb21_commands(data: &[u8], section: usize) -> anyhow::Result<Vec<Command>> {
    let mut commands = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (header, _) = Sb2CommandHeader::read_from_prefix(&data[offset..])
            .map_err(|_| sb21_invalid(format!("Truncated command at section offset {offset}")))?;
        if header.checksum != header.compute_checksum() {
            return Err(sb21_invalid(format!(
                "Command checksum mismatch at section offset {offset}"
            )));
        }
        offset += SB2_BLOCK_SIZE;

        let address = header.address.get();
        let count = header.count.get();
        let flags = header.flags.get();
        let memory_id = u32::from(flags >> 8);
        let kind = match header.tag {
            SB2_CMD_NOP => continue,
            SB2_CMD_LOAD => {
                let padded = (count as usize).next_multiple_of(SB2_BLOCK_SIZE);
                let payload = slice(data, offset, padded)
                    .ok_or_else(|| sb21_invalid("Load payload exceeds the section"))?;
                if crc32_mpeg2(payload) != header.data.get() {
                    return Err(sb21_invalid(format!(
                        "Load payload CRC mismatch at address {address:#x}"
                    )));
                }
                offset += padded;
                CommandKind::Load {
                    address,
                    data: payload[..count as usize].to_vec(),
                    memory_id,
                }
            }
            SB2_CMD_FILL => CommandKind::Fill {
                address,
                length: count,
                pattern: header.data.get(),
            },
            SB2_CMD_ERASE => CommandKind::Erase {
                address,
                length: count,
                memory_id,
                erase_all: flags & SB2_ERASE_FLAG_ALL != 0,
            },
            SB2_CMD_MEM_ENABLE => CommandKind::Enable {
                address,
                size: count,
                memory_id,
            },
            SB2_CMD_RESET => CommandKind::Reset,
            SB2_CMD_JUMP => CommandKind::Jump {
                address,
                argument: header.data.get(),
                stack_pointer: (flags & SB2_JUMP_FLAG_SP != 0).then_some(count),
            },
            SB2_CMD_CALL => CommandKind::Call {
                address,
                argument: header.data.get(),
            },
            SB2_CMD_KEYSTORE_TO_NV => CommandKind::KeyStoreToNv { address, memory_id },
            SB2_CMD_KEYSTORE_FROM_NV => CommandKind::KeyStoreFromNv { address, memory_id },
            SB2_CMD_FW_VERSION_CHECK => CommandKind::VersionCheck {
                counter: VersionCounter::from_id(address)
                    .ok_or_else(|| sb21_invalid(format!("Unknown version counter {address}")))?,
                version: count,
            },
            tag => {
                return Err(sb21_invalid(format!(
                    "Unexpected command tag {tag:#04x} inside a section"
                )))
            }
        };
        commands.push(Command {
            position: CommandPosition {
                section,
                index: commands.len(),
            },
            kind,
        });
    }
    Ok(commands)
}

fn sb31_counter(id: u32) -> Option<VersionCounter> {
    match id {
        1 => Some(VersionCounter::NonSecure),
        2 => Some(VersionCounter::Secure),
        _ => None,
    }
}

/// Decode a plain SB3.1 command stream
///
/// Decoding stops at the first 16-byte record that does not carry the command tag,
/// which covers the zero padding of the last block.
pub fn decode_sb31_commands(stream: &[u8]) -> anyhow::Result<Vec<Command>> {
    let mut commands = Vec::new();
    let mut offset = 0;
    while let Ok((header, _)) = Sb31CommandHeader::read_from_prefix(&stream[offset..]) {
        if header.tag.get() != SB31_CMD_TAG {
            break;
        }
        let start = offset;
        offset += AES_BLOCK_SIZE;
        let address = header.address.get();
        let length = header.length.get();

        let mut args = [0u32; 4];
        let has_args = matches!(
            header.command.get(),
            SB31_CMD_ERASE
                | SB31_CMD_LOAD
                | SB31_CMD_COPY
                | SB31_CMD_LOAD_KEY_BLOB
                | SB31_CMD_CONFIGURE_MEMORY
                | SB31_CMD_FILL_MEMORY
        );
        if has_args {
            let block = slice(stream, offset, AES_BLOCK_SIZE)
                .ok_or_else(|| sb31_invalid("Truncated command arguments"))?;
            for (arg, word) in args.iter_mut().zip(block.chunks(4)) {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(word);
                *arg = u32::from_le_bytes(bytes);
            }
            offset += AES_BLOCK_SIZE;
        }
        let has_data = matches!(
            header.command.get(),
            SB31_CMD_LOAD | SB31_CMD_PROGRAM_FUSES | SB31_CMD_LOAD_KEY_BLOB
        );
        let data = if has_data {
            let data = slice(stream, offset, length as usize)
                .ok_or_else(|| sb31_invalid("Command data exceeds the stream"))?
                .to_vec();
            offset += length as usize;
            data
        } else {
            Vec::new()
        };
        offset = start + (offset - start).next_multiple_of(AES_BLOCK_SIZE);

        let kind = match header.command.get() {
            SB31_CMD_ERASE => CommandKind::Erase {
                address,
                length,
                memory_id: args[0],
                erase_all: false,
            },
            SB31_CMD_LOAD => CommandKind::Load {
                address,
                data,
                memory_id: args[0],
            },
            SB31_CMD_EXECUTE => CommandKind::Jump {
                address,
                argument: 0,
                stack_pointer: None,
            },
            SB31_CMD_CALL => CommandKind::Call {
                address,
                argument: 0,
            },
            SB31_CMD_PROGRAM_FUSES => CommandKind::ProgramFuses {
                address,
                values: data
                    .chunks(4)
                    .map(|word| {
                        let mut bytes = [0u8; 4];
                        bytes[..word.len()].copy_from_slice(word);
                        u32::from_le_bytes(bytes)
                    })
                    .collect(),
            },
            SB31_CMD_COPY => CommandKind::Copy {
                address,
                length,
                destination: args[0],
                memory_id_from: args[1],
                memory_id_to: args[2],
            },
            SB31_CMD_LOAD_KEY_BLOB => CommandKind::LoadKeyBlob {
                offset: address,
                wrapping_key_id: args[0],
                data,
            },
            SB31_CMD_CONFIGURE_MEMORY => CommandKind::Enable {
                address,
                size: 0,
                memory_id: args[0],
            },
            SB31_CMD_FILL_MEMORY => CommandKind::Fill {
                address,
                length,
                pattern: args[0],
            },
            SB31_CMD_FW_VERSION_CHECK => CommandKind::VersionCheck {
                counter: sb31_counter(address)
                    .ok_or_else(|| sb31_invalid(format!("Unknown version counter {address}")))?,
                version: length,
            },
            other => return Err(sb31_invalid(format!("Unknown command id {other}"))),
        };
        commands.push(Command {
            position: CommandPosition {
                section: 0,
                index: commands.len(),
            },
            kind,
        });
        if offset >= stream.len() {
            break;
        }
    }
    Ok(commands)
}
